pub mod types;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use types::AppConfig;

/// A limits file has no business being bigger than this; refusing early
/// beats feeding a mistyped path (a tarball, a log) to the TOML parser.
const CONFIG_SIZE_CAP: u64 = 512 * 1024;

/// Read a config file from disk and hand it to [`parse_config`].
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    anyhow::ensure!(
        size <= CONFIG_SIZE_CAP,
        "{} is {} bytes; refusing configs over {} bytes",
        path.display(),
        size,
        CONFIG_SIZE_CAP
    );

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_config(&raw)
}

/// Parse a TOML document into an [`AppConfig`] and validate it.
pub fn parse_config(raw: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(raw).context("invalid TOML in configuration")?;
    validate(&config)?;
    Ok(config)
}

/// Reject configs the daemon could not run with.
fn validate(config: &AppConfig) -> Result<()> {
    if config.limits.max_connections == 0 {
        anyhow::bail!("limits.max_connections must be greater than 0");
    }
    config
        .admin
        .listen
        .parse::<SocketAddr>()
        .with_context(|| format!("admin.listen is not a socket address: {}", config.admin.listen))?;
    validate_servers(config)
}

fn validate_servers(config: &AppConfig) -> Result<()> {
    if config.servers.is_empty() {
        anyhow::bail!("at least one [[servers]] entry is required");
    }

    let mut names = HashSet::new();
    for server in &config.servers {
        if server.name.is_empty() {
            anyhow::bail!("server name must not be empty");
        }
        if !names.insert(server.name.as_str()) {
            anyhow::bail!("duplicate server name: {}", server.name);
        }
        server.listen.parse::<SocketAddr>().with_context(|| {
            format!(
                "server `{}` listen is not a socket address: {}",
                server.name, server.listen
            )
        })?;
        if server.base_dir.as_os_str().is_empty() {
            anyhow::bail!("server `{}` base_dir must not be empty", server.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::types::LogFormat;
    use super::*;

    const MINIMAL: &str = r#"
[[servers]]
name = "files1"
listen = "127.0.0.1:7777"
base_dir = "/srv/files"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.admin.listen, "127.0.0.1:7700");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.limits.max_connections, 256);
        assert!(config.servers[0].throttle.enabled);
        assert_eq!(config.servers[0].throttle.total_limit, 0);
    }

    #[test]
    fn full_config_round_trips() {
        let config = parse_config(
            r#"
[admin]
listen = "127.0.0.1:9000"

[logging]
level = "debug"
format = "json"

[limits]
max_connections = 8
shutdown_timeout = 5

[[servers]]
name = "files1"
listen = "0.0.0.0:7777"
base_dir = "/srv/files"

[servers.throttle]
enabled = false
total_limit = 1048576
"#,
        )
        .unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.limits.max_connections, 8);
        assert!(!config.servers[0].throttle.enabled);
        assert_eq!(config.servers[0].throttle.total_limit, 1_048_576);
    }

    #[test]
    fn servers_are_required() {
        let err = parse_config("[admin]\nlisten = \"127.0.0.1:7700\"\n").unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn duplicate_server_names_are_rejected() {
        let doubled = format!("{MINIMAL}\n{MINIMAL}");
        let err = parse_config(&doubled).unwrap_err();
        assert!(err.to_string().contains("duplicate server name"));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let err = parse_config(
            r#"
[[servers]]
name = "files1"
listen = "not-an-address"
base_dir = "/srv/files"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a socket address"));
    }

    #[test]
    fn zero_max_connections_is_rejected() {
        let bad = format!("[limits]\nmax_connections = 0\n{MINIMAL}");
        let err = parse_config(&bad).unwrap_err();
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn oversized_config_files_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        std::fs::write(&path, vec![b'#'; (CONFIG_SIZE_CAP + 1) as usize]).unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("refusing"));
    }
}
