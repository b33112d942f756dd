//! `notirelay push`: hand one captured notification to the daemon.

use notirelay_core::RawEvent;

use crate::cli::PushOpts;
use crate::client::rpc_call;

pub async fn cmd_push(socket_path: &str, opts: PushOpts) -> anyhow::Result<()> {
    let event = build_event(opts, now_millis());
    let params = serde_json::to_value(&event)?;
    rpc_call(socket_path, "raw_event", params).await?;
    println!("queued {}", event.dedup_key);
    Ok(())
}

/// Fill in the timestamp and dedup key the capture layer would supply.
pub(crate) fn build_event(opts: PushOpts, now: u64) -> RawEvent {
    let occurred_at = opts.at.unwrap_or(now);
    let dedup_key = opts
        .key
        .unwrap_or_else(|| format!("{}:{}:{occurred_at}", opts.source, opts.sender));
    RawEvent {
        source_id: opts.source,
        sender: opts.sender,
        body: opts.body,
        occurred_at,
        dedup_key,
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
