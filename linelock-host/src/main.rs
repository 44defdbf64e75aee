//! linelock-host binary entry point.
//!
//! Usage:
//! ```bash
//! LINELOCK_DB_SECRET=... linelock-host --config linelock.toml
//! linelock-host --project-dir ./project --bind 0.0.0.0:52700
//! ```
//!
//! Once running, the host reads console commands from stdin until `quit`
//! or end of input.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use linelock_host::{Config, Host, HostHandle};
use linelock_types::AccessLevel;
use tracing_subscriber::EnvFilter;

/// Host a linelock project.
#[derive(Parser, Debug)]
#[command(name = "linelock-host")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (optional; defaults apply when it does not exist)
    #[arg(long, short, default_value = "linelock.toml")]
    config: PathBuf,

    /// Bind address, overrides `server.bind_address`
    #[arg(long)]
    bind: Option<String>,

    /// Project directory, overrides `server.project_dir`
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        tracing::info!(path = %cli.config.display(), "no config file, using defaults");
        Config::default()
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(dir) = cli.project_dir {
        config.server.project_dir = dir;
    }

    let mut host = Host::start(config).context("failed to start host")?;
    println!("linelock-host v{}", env!("CARGO_PKG_VERSION"));
    println!("Listening on {}", host.local_addr());
    println!("Project code: {}", host.project_code());
    println!("Type `help` for console commands.");

    console(&host)?;
    host.shutdown();
    Ok(())
}

fn console(host: &HostHandle) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read console input")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let result: Result<()> = match words.as_slice() {
            [] => Ok(()),
            ["help"] => {
                println!("add <file> [hidden|edit|limit]     register a file");
                println!("access <file> <hidden|edit|limit>  change a file's access level");
                println!("rename <old> <new>                 rename a file");
                println!("remove <file>                      stop sharing a file");
                println!("clients                            list connected users");
                println!("code                               print the project code");
                println!("quit                               stop the host");
                Ok(())
            }
            ["add", name] => Ok(host.register_file(name, AccessLevel::Edit)?),
            ["add", name, level] => {
                parse_access(level).and_then(|access| Ok(host.register_file(name, access)?))
            }
            ["access", name, level] => {
                parse_access(level).and_then(|access| Ok(host.set_access(name, access)?))
            }
            ["rename", old, new] => Ok(host.rename_file(old, new)?),
            ["remove", name] => Ok(host.remove_file(name)?),
            ["clients"] => {
                for name in host.usernames() {
                    println!("{name}");
                }
                Ok(())
            }
            ["code"] => {
                println!("{}", host.project_code());
                Ok(())
            }
            ["quit"] | ["exit"] => break,
            _ => Err(anyhow::anyhow!("unknown command, type `help`")),
        };
        if let Err(e) = result {
            println!("error: {e}");
        }
    }
    Ok(())
}

fn parse_access(text: &str) -> Result<AccessLevel> {
    match text.to_ascii_lowercase().as_str() {
        "hidden" => Ok(AccessLevel::Hidden),
        "edit" => Ok(AccessLevel::Edit),
        "limit" => Ok(AccessLevel::Limit),
        other => anyhow::bail!("unknown access level: {other}"),
    }
}
