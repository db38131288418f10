//! `typewire tools`: List a capability server's tools.

use std::path::Path;

use typewire_agent::paid_http_client;
use typewire_core::{CallContext, CapabilityClient};
use typewire_tools::HttpCapabilityClient;

pub async fn run(config_path: Option<&Path>, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let client = HttpCapabilityClient::new(paid_http_client(&config)?);

    let tools = client
        .list_tools(url.trim_end_matches('/'), &CallContext::default())
        .await?;

    if tools.is_empty() {
        println!("{url} exposes no tools");
        return Ok(());
    }

    println!("{} tool(s) at {url}:", tools.len());
    for tool in &tools {
        if tool.description.is_empty() {
            println!("  {}", tool.name);
        } else {
            println!("  {}: {}", tool.name, tool.description);
        }
        if !tool.input_schema.is_null() {
            println!("      params: {}", tool.input_schema);
        }
    }
    Ok(())
}
