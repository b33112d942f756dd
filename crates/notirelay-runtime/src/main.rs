//! notirelay: notification thread aggregator and peripheral reminder relay.
//! One binary: the daemon plus thin RPC clients for every operation.

use clap::Parser;

mod cli;
mod client;
mod cmd_encode;
mod cmd_push;
mod cmd_status;
mod cmd_threads;
mod daemon;
mod frame_relay;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("NOTIRELAY_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("notirelay daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Push(opts) => cmd_push::cmd_push(&socket_path, opts).await?,
        cli::Command::Threads => cmd_threads::cmd_threads(&socket_path).await?,
        cli::Command::Read(opts) => cmd_threads::cmd_read(&socket_path, opts.thread_id).await?,
        cli::Command::Focus => cmd_threads::cmd_focus(&socket_path).await?,
        cli::Command::Reload => cmd_status::cmd_reload(&socket_path).await?,
        cli::Command::Status => cmd_status::cmd_status(&socket_path).await?,
        cli::Command::Encode(opts) => cmd_encode::cmd_encode(&opts),
    }

    Ok(())
}
