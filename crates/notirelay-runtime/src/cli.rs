//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use notirelay_daemon::settings::CONFIG_ENV;

#[derive(Parser)]
#[command(name = "notirelay", about = "notification thread aggregator and reminder relay")]
pub struct Cli {
    /// UDS socket path (default: /tmp/notirelay-$USER/notirelayd.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (ingest task + UDS server)
    Daemon(DaemonOpts),
    /// Send one captured notification to the daemon
    Push(PushOpts),
    /// List live threads, most recent first
    Threads,
    /// Mark a thread read and print the dedup key to cancel
    Read(ReadOpts),
    /// The thread list was viewed: drop every fully read thread
    Focus,
    /// Re-read the eligible source set from the settings file
    Reload,
    /// Show daemon counters
    Status,
    /// Encode a reminder frame locally and print it as hex
    Encode(EncodeOpts),
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Settings file (default: $XDG_CONFIG_HOME/notirelay/settings.json)
    #[arg(long, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Write frames to this path (tty, FIFO or file). Frames are logged when unset.
    #[arg(long)]
    pub relay_out: Option<PathBuf>,

    /// Also read newline-delimited JSON events from stdin
    #[arg(long)]
    pub stdin_events: bool,
}

#[derive(clap::Args)]
pub struct PushOpts {
    /// Originating app identifier
    #[arg(long)]
    pub source: String,

    #[arg(long, default_value = "")]
    pub sender: String,

    #[arg(long, default_value = "")]
    pub body: String,

    /// OS-side notification key (default: source:sender:at)
    #[arg(long)]
    pub key: Option<String>,

    /// Epoch milliseconds (default: now)
    #[arg(long)]
    pub at: Option<u64>,
}

#[derive(clap::Args)]
pub struct ReadOpts {
    pub thread_id: u64,
}

#[derive(clap::Args)]
pub struct EncodeOpts {
    #[arg(long)]
    pub name: String,

    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long, default_value = "")]
    pub text: String,

    #[arg(long, default_value = "")]
    pub date: String,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/notirelay/notirelayd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/notirelay-{user}/notirelayd.sock")
}
