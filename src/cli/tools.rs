//! Tool discovery and health command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use mcpdrive::mcp::ClientRegistry;
use mcpdrive::utils::string::preview;

/// List the catalog of an MCP server.
pub(crate) async fn cmd_tools(config_path: Option<&Path>, endpoint: &str) -> Result<()> {
    let config = super::config::load(config_path)?;
    let registry = ClientRegistry::new(config.mcp);

    let client = registry
        .get(endpoint)
        .await
        .with_context(|| format!("Failed to connect to {}", endpoint))?;
    let tools = client.tools().await;

    println!("Tools at {}:", client.endpoint());
    println!();
    for tool in &tools {
        println!("  {:<28} {}", tool.name, preview(&tool.description, 70));
    }
    println!();
    println!("{} tool(s).", tools.len());

    registry.disconnect_all().await;
    Ok(())
}

/// Print the health of an MCP server as JSON. Exits non-zero when unreachable.
pub(crate) async fn cmd_health(config_path: Option<&Path>, endpoint: &str) -> Result<()> {
    let config = super::config::load(config_path)?;
    let registry = ClientRegistry::new(config.mcp);

    let health = registry.health_check(endpoint).await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    registry.disconnect_all().await;

    if !health.connected {
        anyhow::bail!("{} is not reachable", endpoint);
    }
    Ok(())
}
