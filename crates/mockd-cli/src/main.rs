//! mockd binary entry point
//!
//! Exit codes: 0 clean, 1 config/validation error, 2 bind failure,
//! 130 signal interrupt.

use clap::{Args, Parser, Subcommand};
use mockd_cli::{Engine, EngineConfig};
use mockd_core::{EngineSettings, Error};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mockd", version, about = "Programmable multi-protocol mock server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the full engine: HTTP(S), admin API and per-mock sub-servers.
    Start(StartArgs),
    /// Single-file dev mode: serve one config, no admin plane.
    Engine(EngineArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Mock-serving HTTP port.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Admin API port.
    #[arg(long, default_value_t = 3001)]
    admin_port: u16,

    /// Optional HTTPS port (self-signed cert unless --tls-cert/--tls-key).
    #[arg(long)]
    https_port: Option<u16>,

    /// TLS certificate PEM file.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// TLS private key PEM file.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,

    /// Disable admin API authentication (development only).
    #[arg(long)]
    no_auth: bool,

    /// Admin API key; generated when auth is on and no key is given.
    #[arg(long, env = "MOCKD_API_KEY")]
    api_key: Option<String>,

    /// Data directory for the catalogue and recordings.
    #[arg(long, default_value = ".mockd")]
    data_dir: PathBuf,

    /// Mock config file (YAML or JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record WebSocket/SSE streams.
    #[arg(long)]
    record_streams: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Args)]
struct EngineArgs {
    /// Mock config file (YAML or JSON).
    #[arg(long)]
    config: PathBuf,

    /// Mock-serving HTTP port.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Print the serving URL once ready.
    #[arg(long)]
    print_url: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.command {
        Command::Start(args) => {
            init_tracing(&args.log_level);
            start_config(args)
        }
        Command::Engine(args) => {
            init_tracing(&args.log_level);
            engine_config(args)
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };
    let code = runtime.block_on(run(config));
    ExitCode::from(code)
}

struct RunConfig {
    engine: EngineConfig,
    print_url: bool,
}

fn start_config(args: StartArgs) -> RunConfig {
    let api_key = if args.no_auth {
        None
    } else {
        Some(args.api_key.unwrap_or_else(|| {
            let key = uuid::Uuid::new_v4().simple().to_string();
            info!("generated admin API key: {key}");
            key
        }))
    };
    RunConfig {
        engine: EngineConfig {
            port: args.port,
            https_port: args.https_port,
            admin_port: Some(args.admin_port),
            tls_cert: args.tls_cert,
            tls_key: args.tls_key,
            api_key,
            data_dir: args.data_dir,
            config_file: args.config,
            settings: EngineSettings::default(),
            record_streams: args.record_streams,
        },
        print_url: false,
    }
}

fn engine_config(args: EngineArgs) -> RunConfig {
    RunConfig {
        engine: EngineConfig {
            port: args.port,
            https_port: None,
            admin_port: None,
            tls_cert: None,
            tls_key: None,
            api_key: None,
            data_dir: std::env::temp_dir()
                .join(format!("mockd-engine-{}", uuid::Uuid::new_v4().simple())),
            config_file: Some(args.config),
            settings: EngineSettings::default(),
            record_streams: false,
        },
        print_url: args.print_url,
    }
}

async fn run(config: RunConfig) -> u8 {
    let engine = match Engine::start(config.engine).await {
        Ok(engine) => engine,
        Err(e @ Error::BindFailure { .. }) => {
            error!("{e}");
            return 2;
        }
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    if config.print_url {
        println!("http://{}", engine.http_addr());
    }

    let interrupted = wait_for_signal().await;
    engine.shutdown().await;
    if interrupted {
        130
    } else {
        0
    }
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return true;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        true
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        true
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
