//! Startup configuration (C9): a hand-rolled CLI flag parser. Invalid input
//! is a startup failure, never a panic -- `main` turns a parse error into a
//! logged message and a non-zero exit code.

use std::fmt;
use std::net::IpAddr;

pub const DEFAULT_PORT: u16 = 8520;

#[derive(Debug, Clone)]
pub struct Config {
    /// Always `0.0.0.0`; the store has no flag for restricting the bind
    /// interface, matching the server it's grounded on.
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Set by `-i`. The interactive line-oriented CLI this flag used to
    /// gate is an external collaborator and out of scope here; the RESP
    /// server starts either way, and this only controls whether a startup
    /// note is logged.
    pub interactive: bool,
    /// Path given to `-f`; preloaded at startup if present, via the same
    /// codec as the `LOAD` command.
    pub preload_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            interactive: false,
            preload_path: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// `-h`/`--help` was given; not an error, but parsing stops short of a
    /// runnable `Config`.
    HelpRequested,
    MissingValue { flag: &'static str },
    InvalidPort(String),
    UnknownFlag(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::HelpRequested => write!(f, "help requested"),
            ConfigError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ConfigError::InvalidPort(s) => write!(f, "invalid port: '{s}'"),
            ConfigError::UnknownFlag(s) => write!(f, "unknown flag: '{s}'"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub const USAGE: &str = "\
kvstored [options]

  -p <port>   listen port (default 8520)
  -i          interactive mode (note only -- see README)
  -f <path>   load a snapshot at startup (same format as the SAVE/LOAD commands)
  -h, --help  print this message and exit
";

impl Config {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-h" | "--help" => return Err(ConfigError::HelpRequested),
                "-i" => config.interactive = true,
                "-p" => {
                    let value = iter.next().ok_or(ConfigError::MissingValue { flag: "-p" })?;
                    config.port = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidPort(value.clone()))?;
                }
                "-f" => {
                    let value = iter.next().ok_or(ConfigError::MissingValue { flag: "-f" })?;
                    config.preload_path = Some(value);
                }
                other => return Err(ConfigError::UnknownFlag(other.to_owned())),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_to_all_interfaces_and_default_port() {
        let config = Config::parse(args(&[])).unwrap();
        assert_eq!(config.bind_addr, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.interactive);
        assert!(config.preload_path.is_none());
    }

    #[test]
    fn parses_port_and_interactive_and_preload() {
        let config = Config::parse(args(&["-p", "7000", "-i", "-f", "dump"])).unwrap();
        assert_eq!(config.port, 7000);
        assert!(config.interactive);
        assert_eq!(config.preload_path.as_deref(), Some("dump"));
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(matches!(
            Config::parse(args(&["-p", "notanumber"])),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn rejects_missing_value() {
        assert!(matches!(
            Config::parse(args(&["-p"])),
            Err(ConfigError::MissingValue { flag: "-p" })
        ));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(matches!(
            Config::parse(args(&["--bogus"])),
            Err(ConfigError::UnknownFlag(_))
        ));
    }

    #[test]
    fn help_flag_short_circuits() {
        assert!(matches!(
            Config::parse(args(&["-h"])),
            Err(ConfigError::HelpRequested)
        ));
    }
}
