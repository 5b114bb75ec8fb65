//! `agilevault` - read Agile Keychain vaults from the command line.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod password;

/// Read items and one-time codes from an Agile Keychain vault.
#[derive(Parser, Debug)]
#[command(name = "agilevault", version, about, long_about = None)]
struct Cli {
    /// Path to the `.agilekeychain` directory.
    #[arg(long, env = "AGILEVAULT_VAULT", global = true)]
    vault: Option<PathBuf>,

    /// Password cache file. Defaults to `<cache dir>/agilevault/cache.json`.
    #[arg(long, env = "AGILEVAULT_CACHE", global = true)]
    cache_file: Option<PathBuf>,

    /// Log level for agilevault crates, unless `RUST_LOG` is set.
    #[arg(long, env = "AGILEVAULT_LOG", default_value = "info", global = true)]
    log_level: String,

    /// Read the master password from the first line of stdin.
    #[arg(long, global = true)]
    password_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List item titles.
    List {
        /// Print a JSON array instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show one item, matched by uuid or title.
    Show {
        item: String,
        /// Print concealed values instead of masking them.
        #[arg(long)]
        reveal: bool,
    },
    /// Print the current one-time codes of an item.
    Totp { item: String },
    /// Store a companion vault's password under this vault's key.
    Remember {
        /// The companion `.agilekeychain` directory.
        companion: PathBuf,
    },
    /// Unlock this vault, then every companion with a cached password.
    UnlockAll,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = agilevault_crypto_core::disable_core_dumps() {
        tracing::warn!("could not disable core dumps: {e}");
    }

    match commands::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("agilevault: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "agilevault={log_level},agilevault_keychain={log_level},agilevault_crypto_core={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "agilevault",
            "show",
            "Email",
            "--vault",
            "/v/a",
            "--password-stdin",
            "--reveal",
        ])
        .unwrap();
        assert_eq!(cli.vault.as_deref(), Some(std::path::Path::new("/v/a")));
        assert!(cli.password_stdin);
        assert!(matches!(cli.command, Commands::Show { reveal: true, .. }));
    }
}
