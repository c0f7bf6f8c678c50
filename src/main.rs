use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use spigot::cli::{Cli, Command};
use spigot::config;
use spigot::logging::setup_logging;

const SAMPLE_CONFIG: &str = r#"# spigot configuration

[admin]
# Control-plane listener (THROTTLE / SLIMIT / CLIMIT commands).
listen = "127.0.0.1:7700"

[logging]
level = "info"     # tracing filter directive
format = "pretty"  # or "json"

[limits]
max_connections = 256
shutdown_timeout = 30

[[servers]]
name = "files1"
listen = "0.0.0.0:7777"
base_dir = "/srv/files"

[servers.throttle]
enabled = true
total_limit = 1048576  # bytes/second
"#;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::CheckConfig) => {
            let cfg = config::load_config(&cli.config)?;
            println!("Configuration is valid.");
            println!("  Admin listen: {}", cfg.admin.listen);
            for server in &cfg.servers {
                println!(
                    "  Server `{}`: {} serving {} ({}abled, {} B/s)",
                    server.name,
                    server.listen,
                    server.base_dir.display(),
                    if server.throttle.enabled { "en" } else { "dis" },
                    server.throttle.total_limit,
                );
            }
            return Ok(());
        }
        Some(Command::Init { output }) => {
            std::fs::write(output, SAMPLE_CONFIG)?;
            eprintln!("Configuration written to: {}", output.display());
            eprintln!();
            eprintln!("Start the server with:");
            eprintln!("  spigot -c {}", output.display());
            return Ok(());
        }
        Some(Command::HealthCheck { addr, timeout }) => {
            use std::net::TcpStream;
            use std::time::Duration;

            let timeout = Duration::from_secs(*timeout);
            let parsed = addr.parse().unwrap_or_else(|_| {
                eprintln!("Invalid address: {}", addr);
                std::process::exit(1);
            });
            match TcpStream::connect_timeout(&parsed, timeout) {
                Ok(_) => {
                    println!("OK: {} is accepting connections", addr);
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("FAIL: {}: {}", addr, e);
                    std::process::exit(1);
                }
            }
        }
        None => {}
    }

    let app_config = config::load_config(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| app_config.logging.level.clone());
    setup_logging(&level, app_config.logging.format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        servers = app_config.servers.len(),
        "Starting spigot file server"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if let Err(e) = spigot::server::run(app_config).await {
            error!(error = %e, "Server error");
            std::process::exit(1);
        }
    });

    Ok(())
}
