//! Thered - port-knock client
//!
//! Sends the current knock sequence for a secret to a host and provisions
//! new secret files.

mod knocker;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use protocol::{DEFAULT_KEY_LENGTH, DEFAULT_PREFIX, DEFAULT_WINDOW_SECS, Secret, TimeWindow, sequence};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "thered")]
#[command(version)]
#[command(about = "Covert port-knock client", long_about = None)]
struct Args {
    /// Time-window length in seconds (must match the server)
    #[arg(long, global = true, default_value_t = DEFAULT_WINDOW_SECS)]
    window_secs: u64,

    /// Secret length in bytes (must match the server)
    #[arg(long, global = true, default_value_t = DEFAULT_KEY_LENGTH)]
    key_length: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Knock the current sequence on a host
    Knock {
        /// Target host name or address
        host: String,

        /// Secret file
        #[arg(short, long)]
        secret: PathBuf,

        /// Delay between knocks in milliseconds
        #[arg(long, default_value_t = 50)]
        delay_ms: u64,

        /// Knock immediately even if the window is about to roll over
        #[arg(long)]
        no_wait: bool,
    },

    /// Generate a new random secret file
    Keygen {
        /// Secret name (file stem)
        name: String,

        /// Directory to write the secret into
        #[arg(short, long, default_value = "secrets/")]
        dir: PathBuf,

        /// File extension the server loads secrets by
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,

        /// Overwrite an existing secret file
        #[arg(long)]
        force: bool,
    },

    /// Print the expected sequence for a secret
    Sequence {
        /// Secret file
        secret: PathBuf,

        /// Window offset relative to the current one
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let window = TimeWindow::from_secs(args.window_secs)
        .context("--window-secs must be at least 1")?;

    match args.command {
        Command::Knock {
            host,
            secret,
            delay_ms,
            no_wait,
        } => {
            let secret = Secret::from_file(&secret, args.key_length)
                .context("Failed to load secret")?;
            let knocker = knocker::Knocker::new(&host, Duration::from_millis(delay_ms), window)?;
            let sent = knocker.knock(&secret, !no_wait)?;
            info!("Sent {} knocks using secret {}", sent.len(), secret.id());
        }
        Command::Keygen {
            name,
            dir,
            prefix,
            force,
        } => {
            let (path, secret) = write_secret(&dir, &name, &prefix, args.key_length, force)?;
            info!(
                "Wrote {}-byte secret to {:?} (fingerprint {})",
                args.key_length,
                path,
                secret.fingerprint()
            );
        }
        Command::Sequence { secret, offset } => {
            let secret = Secret::from_file(&secret, args.key_length)
                .context("Failed to load secret")?;
            let index = window.index(Utc::now()).saturating_add_signed(offset);
            let ports = sequence::generate(secret.as_bytes(), index);
            println!(
                "{} [{}] window {} (from {}):",
                secret.id(),
                secret.fingerprint(),
                index,
                window.start_of(index).format("%Y-%m-%d %H:%M:%S UTC")
            );
            let rendered: Vec<String> = ports.ports().iter().map(|p| p.to_string()).collect();
            println!("{}", rendered.join(" "));
        }
    }

    Ok(())
}

/// Write fresh key material to `<dir>/<name>.<prefix>`
fn write_secret(
    dir: &Path,
    name: &str,
    prefix: &str,
    key_length: usize,
    force: bool,
) -> Result<(PathBuf, Secret)> {
    if key_length == 0 {
        anyhow::bail!("--key-length must be greater than zero");
    }

    let path = dir.join(format!("{}.{}", name, prefix));
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create secret directory: {:?}", dir))?;

    let secret = Secret::generate(name, key_length);
    std::fs::write(&path, secret.as_bytes())
        .with_context(|| format!("Failed to write secret: {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {:?}", path))?;
    }

    Ok((path, secret))
}
