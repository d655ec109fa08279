use kvstored::config::{Config, ConfigError, USAGE};
use log::{error, info};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::parse(args) {
        Ok(config) => config,
        Err(ConfigError::HelpRequested) => {
            print!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{e}");
            print!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    if config.interactive {
        info!("-i given: the line-oriented CLI is a separate client, not part of this server; starting the RESP listener as usual");
    }

    if let Err(e) = kvstored::run(config) {
        error!("server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
