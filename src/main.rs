mod agent;
mod audit;
mod bus;
mod cli_session;
mod config;
mod core;
mod gateway;
mod idempotency;
mod intent;
mod observability;
mod platform;
mod policy;
mod process;
mod providers;
mod replay;
mod routing;
mod task;
mod tools;

#[cfg(test)]
mod integration_tests;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load environment file.
    // - Default: .env discovered from current working directory and parents.
    // - Override: SYPHERD_ENV_FILE=/absolute/path/to/envfile
    if let Ok(path) = std::env::var("SYPHERD_ENV_FILE") {
        if !path.trim().is_empty() {
            if let Err(e) = dotenvy::from_path(&path) {
                eprintln!("Warning: failed to load SYPHERD_ENV_FILE '{}': {}", path, e);
            }
        } else {
            let _ = dotenvy::dotenv();
        }
    } else {
        let _ = dotenvy::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut safe_mode = false;
    let args: Vec<String> = std::env::args().skip(1).collect();
    for arg in &args {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sypherd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("sypherd {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: sypherd [OPTIONS]\n");
                println!("Options:");
                println!("  --safe           Safe mode: disable exec, remote API calls, task killing");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                println!("\nConfig: ~/.sypherd/config.json (JSON; missing file uses defaults)");
                println!("Gateway: POST /inbound, POST /cancel, GET /health, GET /metrics");
                return Ok(());
            }
            "--safe" | "-safe" => {
                safe_mode = true;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                std::process::exit(1);
            }
        }
    }

    // Configuration parse errors on startup are fatal.
    let config_path = config::config_path();
    let config = config::AppConfig::load(&config_path)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::run(config, safe_mode))
}
