//! Maestro - conversational tool orchestration
//!
//! A chat REPL where a language model routes requests to tools, missing
//! parameters are collected conversationally, and tools can chain into
//! sub-tools on a bounded stack.

mod collaborator;
mod engine;
mod registry;
mod session;

use collaborator::openai::OpenAiCollaborator;
use engine::{DepthPolicy, DEFAULT_DEPTH_LIMIT};
use registry::ToolRegistry;
use session::ChatSession;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maestro=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Configuration
    let depth_limit: usize = std::env::var("MAESTRO_DEPTH_LIMIT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_DEPTH_LIMIT);

    let registry = Arc::new(ToolRegistry::builtin());
    let collaborator = Arc::new(OpenAiCollaborator::from_env());

    let session_id = uuid::Uuid::new_v4();
    tracing::info!(%session_id, depth_limit, "session starting");

    let mut session = ChatSession::with_depth(
        registry,
        collaborator,
        DepthPolicy::with_limit(depth_limit),
    );

    println!("maestro - type a request, /help for commands, /exit to quit");

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        if matches!(line.trim(), "/exit" | "/quit") {
            break;
        }
        for output in session.run_turn(&line).await {
            println!("{output}");
        }
    }

    Ok(())
}
