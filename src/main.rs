use clap::{Parser, ValueEnum};
use paylink_bridge::bridge::ToolBridge;
use paylink_bridge::config::AppConfig;
use paylink_bridge::transport::HttpTransport;
use paylink_bridge::types::ToolCallRequest;
use paylink_bridge::{server, stdio};
use serde_json::{Map, Value};
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "paylink-bridge",
    version,
    about = "Tool bridge between an agent runtime and the PayLink payment service"
)]
struct Cli {
    /// Tool service endpoint; overrides the configuration file.
    #[arg(long)]
    endpoint: Option<String>,
    /// Model announced to the agent runtime; overrides the configuration file.
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, value_enum, default_value_t = RunMode::Tools)]
    mode: RunMode,
    #[arg(long, default_value = "127.0.0.1:8090")]
    rest_addr: SocketAddr,
    /// Tool to invoke in call mode.
    #[arg(long)]
    tool: Option<String>,
    /// Inline JSON object with call arguments.
    #[arg(long)]
    args: Option<String>,
    /// File containing a JSON object with call arguments.
    #[arg(long)]
    args_file: Option<String>,
    /// Retry transient transport failures in call mode.
    #[arg(long)]
    retry: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Tools,
    Call,
    Stdio,
    Serve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    info!("Starting paylink-bridge");
    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, endpoint = ?cli.endpoint, "CLI arguments parsed");

    let config_path = cli
        .config
        .as_deref()
        .map(|raw| shellexpand::tilde(raw).into_owned());
    let mut config = AppConfig::load(config_path.as_deref().map(Path::new))?;
    if let Some(path) = &config_path {
        info!(path = %path, "Loaded configuration from file");
    } else {
        info!("Loaded configuration using default path or defaults");
    }

    if let Some(endpoint) = cli.endpoint.clone() {
        config.endpoint = endpoint;
    }
    if let Some(model) = cli.model.clone() {
        config.model = model;
    }
    if let Some(secs) = cli.timeout_secs {
        if secs == 0 {
            return Err("request timeout must be a positive number of seconds".into());
        }
        config.request_timeout = Duration::from_secs(secs);
    }

    let transport = Arc::new(HttpTransport::new(
        config.endpoint.clone(),
        config.request_timeout,
    )?);
    debug!(endpoint = %transport.endpoint(), model = %config.model, "Connecting tool bridge");
    let bridge = Arc::new(
        ToolBridge::connect(config.model.clone(), transport, config.retry_policy()).await?,
    );

    info!(mode = ?cli.mode, "Running bridge in selected mode");
    match cli.mode {
        RunMode::Tools => {
            let handoff = bridge.handoff().await;
            println!("{}", serde_json::to_string_pretty(&handoff)?);
        }
        RunMode::Call => {
            let tool = cli.tool.clone().ok_or("call mode requires --tool")?;
            let arguments = load_arguments(&cli)?;
            info!(tool = %tool, retry = cli.retry, "Dispatching single tool call via CLI mode");
            let request = ToolCallRequest::new(tool, arguments);
            let result = if cli.retry {
                bridge.invoke_retrying(request).await
            } else {
                bridge.invoke(request).await
            };
            match result {
                Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Err(err) => {
                    eprintln!("{}", err.user_message());
                    return Err(err.into());
                }
            }
        }
        RunMode::Stdio => {
            info!("Entering STDIO mode; awaiting JSON line input");
            stdio::run(bridge.clone()).await?;
        }
        RunMode::Serve => {
            info!(addr = %cli.rest_addr, "Starting REST server");
            server::serve(bridge.clone(), cli.rest_addr).await?;
        }
    }
    info!("Bridge execution finished");
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

fn load_arguments(cli: &Cli) -> Result<Map<String, Value>, Box<dyn Error>> {
    if let Some(raw) = &cli.args {
        info!("Using arguments provided through CLI flags");
        return parse_arguments(raw);
    }

    if let Some(path) = &cli.args_file {
        info!(path = %path, "Loading arguments from file");
        let content = fs::read_to_string(path)?;
        return parse_arguments(&content);
    }

    if atty::isnt(atty::Stream::Stdin) {
        info!("Reading arguments from standard input");
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        if !buffer.trim().is_empty() {
            return parse_arguments(&buffer);
        }
    }

    debug!("No arguments provided; invoking with an empty object");
    Ok(Map::new())
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, Box<dyn Error>> {
    let value: Value = serde_json::from_str(raw.trim())?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err("tool arguments must be a JSON object".into()),
    }
}
