//! Integration tests that call the real Claude API.
//!
//! These tests require ANTHROPIC_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p lorekeeper-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - API costs in CI
//! - Test failures when no API key is available
//! - Slow test runs (API calls take seconds)

use lorekeeper_core::testing::sample_story;
use lorekeeper_core::{
    ClaudeConfig, ClaudeServices, Collaborators, ConsistencyVerifier, EditSession, EditorConfig,
    Outcome, ShowTellAnalyzer, TextGenerator,
};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

fn services() -> ClaudeServices {
    let api_key = std::env::var("ANTHROPIC_API_KEY").expect("key checked by has_api_key");
    ClaudeServices::with_config(api_key, ClaudeConfig::default().with_max_tokens(1024))
        .expect("Failed to build Claude services")
}

#[tokio::test]
#[ignore] // Run with: cargo test -p lorekeeper-core --test api_integration -- --ignored
async fn test_verifier_flags_obvious_contradiction() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let verdict = services()
        .verify(
            "Mara blinked her bright blue eyes and dove into the river, swimming easily to the far bank.",
            "Mara",
            "Seventeen. Green eyes. Never learned to swim.",
        )
        .await
        .expect("verifier should respond");

    println!("Verdict: {verdict:?}");
    assert!(verdict.is_contradictory);
}

#[tokio::test]
#[ignore]
async fn test_verifier_accepts_consistent_paragraph() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let verdict = services()
        .verify(
            "Mara turned the brass compass over in her hands, green eyes narrowed at the river.",
            "Mara",
            "Seventeen. Green eyes. Carries her grandmother's brass compass.",
        )
        .await
        .expect("verifier should respond");

    println!("Verdict: {verdict:?}");
    assert!(!verdict.is_contradictory);
}

#[tokio::test]
#[ignore]
async fn test_analyzer_returns_quotable_phrases() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let text = "She was very sad. He felt angry about the letter. The room was scary.";
    let suggestions = services()
        .analyze(text)
        .await
        .expect("analyzer should respond");

    println!("Suggestions: {suggestions:#?}");
    assert!(!suggestions.is_empty());
    // The model may paraphrase; most suggestions should still quote the text
    let quoted = suggestions
        .iter()
        .filter(|s| text.contains(&s.original_text))
        .count();
    assert!(quoted > 0, "no suggestion quoted the manuscript verbatim");
}

#[tokio::test]
#[ignore]
async fn test_generator_continues_story() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let continuation = services()
        .continue_text("Mara left Oakhollow before dawn, the compass warm in her palm.")
        .await
        .expect("generator should respond");

    println!("Continuation: {continuation}");
    assert!(!continuation.trim().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_session_with_real_services() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let collaborators = Collaborators::shared(services());
    let mut session = EditSession::open_first(
        sample_story(),
        EditorConfig::default().with_autosave(false),
        collaborators,
    )
    .expect("session should open");

    let block = session.document().blocks()[0].id();
    session
        .replace_block_text(
            block,
            "Mara swam across the river with ease, her blue eyes fixed on Oakhollow.",
        )
        .expect("edit should apply");

    let outcomes = session.settle().await;
    for outcome in &outcomes {
        println!("{outcome:?}");
    }

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::VerificationApplied { .. }))
        .count();
    assert!(applied > 0, "expected at least one verdict to apply");
    println!(
        "Flagged entities: {}",
        session.inconsistencies().len()
    );
}
