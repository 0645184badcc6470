//! Run command handler: one generation cycle from the command line.
//!
//! Progress events go to stderr as JSON lines; the answer goes to stdout.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use mcpdrive::agent::{GenerateRequest, GenerationMode, Orchestrator, ProgressEmitter};
use mcpdrive::mcp::ClientRegistry;
use mcpdrive::providers::ClaudeProvider;
use mcpdrive::session::{ConversationMessage, ConversationStore};

pub(crate) struct RunOptions {
    pub endpoint: Option<String>,
    pub mode: GenerationMode,
    pub system: Option<String>,
    pub chat: String,
    pub store: bool,
    pub message: String,
}

pub(crate) async fn cmd_run(config_path: Option<&Path>, options: RunOptions) -> Result<()> {
    let config = super::config::load(config_path)?;

    let provider = ClaudeProvider::from_config(&config.model)
        .with_context(|| format!("Add your API key to {:?}", mcpdrive::config::Config::path()))?;
    let registry = ClientRegistry::new(config.mcp.clone());
    let mut orchestrator = Orchestrator::new(Arc::new(provider), registry.clone(), &config);
    if options.store {
        let store = ConversationStore::new().with_context(|| "Failed to open conversation store")?;
        orchestrator = orchestrator.with_store(Arc::new(store));
    }

    let emitter = ProgressEmitter::new();
    let mut subscription = emitter.subscribe(&options.chat);
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{}", line);
            }
        }
    });

    let mut request = GenerateRequest::new(
        &options.chat,
        vec![ConversationMessage::user(&options.message)],
    )
    .with_mode(options.mode);
    if let Some(endpoint) = &options.endpoint {
        request = request.with_endpoint(endpoint);
    }
    if let Some(system) = &options.system {
        request = request.with_system(system);
    }

    let result = orchestrator
        .generate(request, &emitter.handle(&options.chat))
        .await;

    emitter.unsubscribe(&options.chat);
    let _ = printer.await;
    registry.disconnect_all().await;

    let answer = result.with_context(|| "Generation failed")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", answer)?;
    Ok(())
}
