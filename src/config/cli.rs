//! Command-line argument parser
//!
//! Parses command-line arguments for Cinnabar, with Redis compatibility.

use thiserror::Error;

/// Command-line arguments for Cinnabar
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Port to listen on
    pub port: Option<u16>,

    /// Address to bind to
    pub bind: Option<String>,

    /// Master to replicate from - (host, port)
    pub replicaof: Option<(String, u16)>,

    /// Directory for the snapshot file
    pub dir: Option<String>,

    /// Snapshot filename
    pub dbfilename: Option<String>,
}

/// Errors raised while parsing command-line arguments
#[derive(Debug, Error)]
pub enum ConfigParseError {
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),

    #[error("invalid port number: {0}")]
    InvalidPort(String),

    #[error("invalid replicaof value: {0}")]
    InvalidReplicaOf(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Parse command-line arguments, exiting on error or --help/--version
pub fn parse_cli_args() -> CliArgs {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match parse_args(&args) {
        Ok(cli_args) => cli_args,
        Err(ParseOutcome::Help) => {
            print_help();
            std::process::exit(0);
        }
        Err(ParseOutcome::Version) => {
            println!("Cinnabar {}", env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }
        Err(ParseOutcome::Invalid(e)) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

/// Non-error outcomes of parsing that still stop the program, plus real
/// parse failures
#[derive(Debug)]
enum ParseOutcome {
    Help,
    Version,
    Invalid(ConfigParseError),
}

impl From<ConfigParseError> for ParseOutcome {
    fn from(e: ConfigParseError) -> Self {
        ParseOutcome::Invalid(e)
    }
}

fn parse_args(args: &[String]) -> Result<CliArgs, ParseOutcome> {
    let mut cli_args = CliArgs::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Err(ParseOutcome::Help),
            "--version" | "-v" => return Err(ParseOutcome::Version),
            "--port" | "-p" => {
                let value = take_value(args, i, "--port")?;
                cli_args.port = Some(parse_port(value)?);
                i += 2;
            }
            "--bind" => {
                cli_args.bind = Some(take_value(args, i, "--bind")?.to_string());
                i += 2;
            }
            "--replicaof" => {
                let value = take_value(args, i, "--replicaof")?;
                if let Some((host, port)) = value.split_once(char::is_whitespace) {
                    // Quoted form: --replicaof "host port"
                    cli_args.replicaof = Some((host.to_string(), parse_port(port.trim())?));
                    i += 2;
                } else {
                    // Two-argument form: --replicaof host port
                    let port = args
                        .get(i + 2)
                        .ok_or(ConfigParseError::MissingArgument("--replicaof"))?;
                    cli_args.replicaof = Some((value.to_string(), parse_port(port)?));
                    i += 3;
                }
            }
            "--dir" => {
                cli_args.dir = Some(take_value(args, i, "--dir")?.to_string());
                i += 2;
            }
            "--dbfilename" => {
                cli_args.dbfilename = Some(take_value(args, i, "--dbfilename")?.to_string());
                i += 2;
            }
            arg => {
                return Err(ConfigParseError::UnknownArgument(arg.to_string()).into());
            }
        }
    }

    Ok(cli_args)
}

fn take_value<'a>(
    args: &'a [String],
    i: usize,
    flag: &'static str,
) -> Result<&'a str, ConfigParseError> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or(ConfigParseError::MissingArgument(flag))
}

fn parse_port(text: &str) -> Result<u16, ConfigParseError> {
    text.parse::<u16>()
        .map_err(|_| ConfigParseError::InvalidPort(text.to_string()))
}

/// Print help information
fn print_help() {
    println!("Usage: cinnabar [OPTIONS]");
    println!("       cinnabar --port 6379");
    println!("       cinnabar --replicaof \"localhost 6379\"");
    println!();
    println!("Options:");
    println!("  --help, -h               Show this help message");
    println!("  --version, -v            Show version information");
    println!("  --port, -p    <port>     TCP port to listen on (default: 6379)");
    println!("  --bind        <address>  Interface to bind to (default: 127.0.0.1)");
    println!("  --replicaof   <host> <port>  Make this server a replica of another instance");
    println!("  --dir         <dir>      Working directory for the snapshot file");
    println!("  --dbfilename  <filename> Snapshot filename");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_basic_flags() {
        let parsed = parse_args(&args(&[
            "--port",
            "9999",
            "--dir",
            "/data",
            "--dbfilename",
            "snap.rdb",
        ]))
        .unwrap();

        assert_eq!(parsed.port, Some(9999));
        assert_eq!(parsed.dir, Some("/data".to_string()));
        assert_eq!(parsed.dbfilename, Some("snap.rdb".to_string()));
        assert_eq!(parsed.replicaof, None);
    }

    #[test]
    fn test_parse_replicaof_quoted_form() {
        let parsed = parse_args(&args(&["--replicaof", "localhost 6379"])).unwrap();
        assert_eq!(parsed.replicaof, Some(("localhost".to_string(), 6379)));
    }

    #[test]
    fn test_parse_replicaof_two_argument_form() {
        let parsed = parse_args(&args(&["--replicaof", "master.local", "7000"])).unwrap();
        assert_eq!(parsed.replicaof, Some(("master.local".to_string(), 7000)));
    }

    #[test]
    fn test_invalid_port() {
        assert!(matches!(
            parse_args(&args(&["--port", "notaport"])),
            Err(ParseOutcome::Invalid(ConfigParseError::InvalidPort(_)))
        ));
    }

    #[test]
    fn test_unknown_argument() {
        assert!(matches!(
            parse_args(&args(&["--frobnicate"])),
            Err(ParseOutcome::Invalid(ConfigParseError::UnknownArgument(_)))
        ));
    }

    #[test]
    fn test_missing_value() {
        assert!(matches!(
            parse_args(&args(&["--dir"])),
            Err(ParseOutcome::Invalid(ConfigParseError::MissingArgument(_)))
        ));
    }
}
