//! `typewire run`: send one request through the agent pipeline.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Args;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use typewire_agent::{InputSchema, RunOptions, StructuredAgent};
use typewire_core::{CapabilityServer, OutputSchema, ProgressEvent, StreamingUpdate};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-Schema file describing the output object
    #[arg(long)]
    pub output_schema: PathBuf,

    /// Input JSON file, or `-` for stdin
    #[arg(long, default_value = "-")]
    pub input: String,

    /// JSON-Schema file the input must satisfy
    #[arg(long)]
    pub input_schema: Option<PathBuf>,

    /// Print field updates to stderr while the response streams
    #[arg(long)]
    pub stream: bool,

    /// Extra capability server as `name=url` (repeatable)
    #[arg(long = "server", value_name = "NAME=URL")]
    pub servers: Vec<String>,

    /// System prompt, overriding the configured one
    #[arg(long)]
    pub system: Option<String>,
}

pub async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    for spec in &args.servers {
        config.servers.push(parse_server(spec)?);
    }
    if let Some(system) = &args.system {
        config.system_prompt = Some(system.clone());
    }

    let output_schema = OutputSchema::from_json_schema(&read_json_file(&args.output_schema)?)?;
    let mut agent = StructuredAgent::from_config(&config, output_schema)?;
    if let Some(path) = &args.input_schema {
        agent = agent.with_input_schema(InputSchema::new(read_json_file(path)?)?);
    }

    let input = read_input(&args.input)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let mut options = RunOptions::new()
        .with_cancel(cancel)
        .on_progress(Arc::new(|event: &ProgressEvent| {
            info!(stage = event.stage.as_str(), "{}", event.message);
        }));
    if args.stream {
        options = options.on_streaming(stderr_printer());
    }

    let output = agent.run(&input, options).await?;
    if args.stream {
        eprintln!();
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(output))?);
    Ok(())
}

/// Parse a `name=url` server flag.
fn parse_server(spec: &str) -> Result<CapabilityServer, String> {
    let (name, url) = spec
        .split_once('=')
        .ok_or_else(|| format!("invalid --server '{spec}', expected NAME=URL"))?;
    let (name, url) = (name.trim(), url.trim());
    if name.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("invalid --server '{spec}', expected NAME=http(s)://..."));
    }
    Ok(CapabilityServer::new(name, name, url))
}

fn read_json_file(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;
    Ok(value)
}

fn read_input(source: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(serde_json::from_str(&text).map_err(|e| format!("stdin is not valid JSON: {e}"))?)
    } else {
        read_json_file(Path::new(source))
    }
}

/// Print streamed fragments to stderr, with a header whenever the field changes.
fn stderr_printer() -> typewire_core::StreamingSink {
    let current = Mutex::new(None::<String>);
    Arc::new(move |update: &StreamingUpdate| {
        let mut stderr = std::io::stderr().lock();
        if let Ok(mut current) = current.lock() {
            if current.as_deref() != Some(update.field.as_str()) {
                let _ = write!(stderr, "\n[{}] ", update.field);
                *current = Some(update.field.clone());
            }
        }
        let _ = write!(stderr, "{}", update.value);
        let _ = stderr.flush();
    })
}
