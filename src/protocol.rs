use thiserror::Error;

/// Commands understood by the data plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataCommand {
    /// Close the conversation (`STOP`).
    Stop,
    /// Stream a file from the server's base directory (`FILE <name>`).
    File { name: String },
}

/// Commands understood by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Close the conversation (`STOP`).
    Stop,
    /// Enable or disable throttling for a named server (`THROTTLE <server> <yes|no>`).
    Throttle { server: String, enable: bool },
    /// Set the bandwidth budget of a named server (`SLIMIT <server> <limit>`).
    ServerLimit { server: String, limit: u64 },
    /// Pin a per-connection limit across all servers (`CLIMIT <addr> <limit>`).
    ConnectionLimit { key: String, limit: u64 },
}

/// Parse/validation failures, rendered to clients as `Error: <message>` lines.
/// A failed command never reaches the throttlers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("command can not be an empty string")]
    Empty,
    #[error("received unknown command: {0}")]
    UnknownCommand(String),
    #[error("command arguments count mismatch. Got: {got}. Want: {want}")]
    ArityMismatch { got: usize, want: usize },
    #[error("failed to parse limit number `{0}`")]
    BadLimit(String),
    #[error("expected yes or no, got `{0}`")]
    BadToggle(String),
}

/// Split one line into its command token and arguments, enforcing the arity
/// declared in `rules`. Tokens are separated by single spaces, matching the
/// wire protocol exactly: runs of spaces produce an arity mismatch rather
/// than being collapsed.
fn split_command<'a>(
    line: &'a str,
    rules: &[(&str, usize)],
) -> Result<(&'a str, Vec<&'a str>), ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut tokens = line.split(' ');
    let name = tokens.next().unwrap_or_default();
    let args: Vec<&str> = tokens.collect();

    let Some(&(_, want)) = rules.iter().find(|(cmd, _)| *cmd == name) else {
        return Err(ParseError::UnknownCommand(name.to_string()));
    };
    if args.len() != want {
        return Err(ParseError::ArityMismatch {
            got: args.len(),
            want,
        });
    }
    Ok((name, args))
}

fn parse_limit(arg: &str) -> Result<u64, ParseError> {
    arg.parse::<u64>()
        .map_err(|_| ParseError::BadLimit(arg.to_string()))
}

/// Parse one data-plane line.
pub fn parse_data_command(line: &str) -> Result<DataCommand, ParseError> {
    const RULES: &[(&str, usize)] = &[("STOP", 0), ("FILE", 1)];
    let (name, args) = split_command(line, RULES)?;
    Ok(match name {
        "STOP" => DataCommand::Stop,
        "FILE" => DataCommand::File {
            name: args[0].to_string(),
        },
        _ => unreachable!("split_command only yields names from RULES"),
    })
}

/// Parse one control-plane line.
pub fn parse_admin_command(line: &str) -> Result<AdminCommand, ParseError> {
    const RULES: &[(&str, usize)] = &[
        ("STOP", 0),
        ("THROTTLE", 2),
        ("SLIMIT", 2),
        ("CLIMIT", 2),
    ];
    let (name, args) = split_command(line, RULES)?;
    Ok(match name {
        "STOP" => AdminCommand::Stop,
        "THROTTLE" => AdminCommand::Throttle {
            server: args[0].to_string(),
            enable: match args[1] {
                "yes" => true,
                "no" => false,
                other => return Err(ParseError::BadToggle(other.to_string())),
            },
        },
        "SLIMIT" => AdminCommand::ServerLimit {
            server: args[0].to_string(),
            limit: parse_limit(args[1])?,
        },
        "CLIMIT" => AdminCommand::ConnectionLimit {
            key: args[0].to_string(),
            limit: parse_limit(args[1])?,
        },
        _ => unreachable!("split_command only yields names from RULES"),
    })
}
