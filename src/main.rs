use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use deploydeck::config::DeployConfig;
use deploydeck::deploy::LogRecord;

#[derive(Parser)]
#[command(
    name = "deploydeck",
    about = "One-click remote deployment over SSH with live log streaming",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML). Defaults to $DEPLOYDECK_CONFIG, then ./deploydeck.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service (deploy trigger, status, live logs)
    Serve {
        /// Bind address, overrides [server].bind
        #[arg(long, env = "DEPLOYDECK_BIND")]
        bind: Option<String>,
    },

    /// Run one deployment in the foreground and print its log
    Run,

    /// Print the effective configuration (password redacted)
    ShowConfig {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(default_filter: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_banner(config: &DeployConfig) {
    let view = config.public_view();
    println!("\n{:=<60}", "");
    println!("deploydeck {}", env!("CARGO_PKG_VERSION"));
    println!("{:=<60}", "");
    println!("{:<15} : {}@{}:{}", "Target", view.username, view.host, view.port);
    println!("{:<15} : {}", "Deploy path", view.deploy_path);
    println!("{:<15} : {}", "Deploy script", view.deploy_script);
    println!("{:=<60}\n", "");
}

fn print_record(record: &LogRecord) {
    println!("[{}] [{}] {}", record.timestamp, record.level, record.message);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Foreground runs print records themselves; keep tracing to warnings.
    let default_filter = match cli.command {
        Commands::Run => "warn",
        _ => "info",
    };
    init_tracing(default_filter, cli.log_json);

    // A local .env fills in SSH_*/DEPLOY_* without overriding the real environment.
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    let mut config = DeployConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;
            print_banner(&config);
            tracing::info!(bind = %config.server.bind, "Starting deploydeck service");
            deploydeck::serve(config).await?;
        }
        Commands::Run => {
            config.validate()?;
            print_banner(&config);

            let deployer = deploydeck::ssh_deployer(&config);
            let handle = deployer.start()?;
            let bus = &deployer.context().bus;

            let outcome = loop {
                if let Some(record) = bus.consume(Duration::from_millis(200)).await {
                    print_record(&record);
                    continue;
                }
                if handle.is_finished() {
                    break handle.await?;
                }
            };
            while let Some(record) = bus.try_consume() {
                print_record(&record);
            }

            if let Err(failure) = outcome {
                anyhow::bail!("deployment did not succeed: {failure}");
            }
        }
        Commands::ShowConfig { json } => {
            let view = config.public_view();
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("{:<15} | {}", "Host", view.host);
                println!("{:<15} | {}", "Port", view.port);
                println!("{:<15} | {}", "Username", view.username);
                println!("{:<15} | {}", "Deploy path", view.deploy_path);
                println!("{:<15} | {}", "Deploy script", view.deploy_script);
                println!(
                    "{:<15} | {}",
                    "Password",
                    if view.has_password { "set" } else { "NOT SET" }
                );
            }
        }
    }

    Ok(())
}
