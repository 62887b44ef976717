mod app;
mod cli;
mod config;
mod crypto;
mod db;
mod error;
mod generate;
mod llm;
mod security;
mod store;
mod variation;

use std::path::PathBuf;

use tracing::{error, info};

use crate::app::{App, KeySource};
use crate::cli::Command;
use crate::config::Config;
use crate::crypto::SecretCipher;
use crate::llm::OpenAiEngine;
use crate::store::SqliteStore;

/// Flags accepted before the command word.
#[derive(Debug, Default, PartialEq)]
struct GlobalArgs {
    config: Option<PathBuf>,
    default_config: bool,
    check: bool,
    help: bool,
}

fn split_global_args(args: &[String]) -> (GlobalArgs, Vec<String>) {
    let mut global = GlobalArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                global.config = args.get(i + 1).map(PathBuf::from);
                i += 2;
                continue;
            }
            "--default-config" => global.default_config = true,
            "--check" => global.check = true,
            "-h" | "--help" => global.help = true,
            _ => break,
        }
        i += 1;
    }
    (global, args[i.min(args.len())..].to_vec())
}

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything reads env vars
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, rest) = split_global_args(&args);

    if global.help {
        print_usage();
        return;
    }

    if global.default_config {
        print!("{}", Config::default_config_contents());
        return;
    }

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load(global.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let data_dir = config.data_dir();
    info!(data_dir = %data_dir.display(), model = %config.model(), "nexus-prompt starting");

    let cipher = match config.encryption_passphrase() {
        Some(passphrase) => SecretCipher::from_passphrase(&passphrase),
        None => match SecretCipher::ensure_key(&data_dir) {
            Ok(c) => c,
            Err(e) => {
                error!("failed to initialize secret key: {e}");
                std::process::exit(1);
            }
        },
    };

    let store = match SqliteStore::open(&data_dir.join("library.db")) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to open library: {e}");
            std::process::exit(1);
        }
    };

    let mut app = match App::new(config, Box::new(store), cipher) {
        Ok(a) => a,
        Err(e) => {
            error!("failed to load library: {e}");
            std::process::exit(1);
        }
    };

    if global.check {
        if !run_checks(&app).await {
            std::process::exit(1);
        }
        return;
    }

    let result = match Command::parse(&rest) {
        Ok(command) => cli::execute(&mut app, command).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Print each check on stdout; returns false if any failed.
async fn run_checks(app: &App) -> bool {
    let config = app.config();
    let mut ok = true;

    println!("config: OK");
    println!("  data_dir: {}", config.data_dir().display());
    println!("  base_url: {}", config.base_url());
    println!("  model: {}", config.model());
    println!("library: OK ({} prompts)", app.library().prompts().len());

    let key = match app.api_key() {
        Ok(Some((key, source))) => {
            let from = match source {
                KeySource::Env => "OPENAI_API_KEY",
                KeySource::Stored => "stored",
                KeySource::Config => "config file",
            };
            println!("api key: set ({from})");
            key
        }
        Ok(None) => {
            println!("api key: NOT SET (run `nexus-prompt set-key <key>`)");
            return false;
        }
        Err(e) => {
            println!("api key: ERROR ({e})");
            return false;
        }
    };

    match OpenAiEngine::new(config, key) {
        Ok(engine) => match engine.check_endpoint().await {
            Ok(()) => println!("endpoint: OK"),
            Err(e) => {
                println!("endpoint: FAILED ({e})");
                ok = false;
            }
        },
        Err(e) => {
            println!("endpoint: FAILED ({e})");
            ok = false;
        }
    }

    ok
}

fn print_usage() {
    println!(
        "nexus-prompt: stream LLM prompt variations into a local library

USAGE:
    nexus-prompt [OPTIONS] [COMMAND] [ARGS...]

OPTIONS:
    --config <PATH>     Path to config file (default: ~/.config/nexus-prompt/config.toml)
    --default-config    Print default config to stdout and exit
    --check             Validate config, API key and endpoint, then exit
    -h, --help          Print this help message

{}

ENVIRONMENT:
    OPENAI_API_KEY        API key (takes precedence over the stored key)
    OPENAI_BASE_URL       OpenAI-compatible API base URL
    OPENAI_MODEL          Model identifier
    NEXUS_ENCRYPTION_KEY  Passphrase for the stored-key cipher (default: key file in data dir)
    RUST_LOG              Optional. Tracing filter (default: warn).
",
        cli::COMMANDS_HELP
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_global_flags_stop_at_command() {
        let (global, rest) = split_global_args(&args("--config c.toml --check list -h"));
        assert_eq!(global.config, Some(PathBuf::from("c.toml")));
        assert!(global.check);
        assert!(!global.help);
        assert_eq!(rest, args("list -h"));
    }

    #[test]
    fn test_no_args() {
        let (global, rest) = split_global_args(&[]);
        assert_eq!(global, GlobalArgs::default());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_dangling_config_flag() {
        let (global, rest) = split_global_args(&args("--config"));
        assert_eq!(global.config, None);
        assert!(rest.is_empty());
    }
}
