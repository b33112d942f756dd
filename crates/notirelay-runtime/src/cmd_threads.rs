//! `notirelay threads | read | focus`: inspect and consume the thread list.

use notirelay_core::{ReadAck, Thread, ThreadId};

use crate::client::rpc_call;

const PREVIEW_CHARS: usize = 40;

pub async fn cmd_threads(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "list_threads", serde_json::json!({})).await?;
    let threads: Vec<Thread> = serde_json::from_value(result)?;
    print!("{}", format_threads(&threads));
    Ok(())
}

pub async fn cmd_read(socket_path: &str, thread_id: u64) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "mark_read", serde_json::json!({ "thread_id": thread_id })).await?;
    let ack: ReadAck = serde_json::from_value(result)?;
    println!("{}", format_ack(&ack));
    Ok(())
}

pub async fn cmd_focus(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "sweep_read", serde_json::json!({})).await?;
    let removed: Vec<ThreadId> = serde_json::from_value(result["removed"].clone())?;
    match removed.len() {
        0 => println!("no read threads"),
        n => println!("removed {n} read thread(s)"),
    }
    Ok(())
}

/// Table of threads, one per line, in the order given.
pub(crate) fn format_threads(threads: &[Thread]) -> String {
    if threads.is_empty() {
        return "no threads\n".to_string();
    }
    let name_width = threads
        .iter()
        .map(|t| t.display_name.chars().count())
        .max()
        .unwrap_or(0)
        .max("SOURCE".len());
    let sender_width = threads
        .iter()
        .map(|t| t.sender.chars().count())
        .max()
        .unwrap_or(0)
        .max("SENDER".len());

    let mut out = format!(
        "{:>4}  {:>6}  {:<name_width$}  {:<sender_width$}  LATEST\n",
        "ID", "UNREAD", "SOURCE", "SENDER"
    );
    for t in threads {
        out.push_str(&format!(
            "{:>4}  {:>6}  {:<name_width$}  {:<sender_width$}  {}\n",
            t.id.0,
            t.unread_count,
            t.display_name,
            t.sender,
            preview(t.latest_body().unwrap_or(""))
        ));
    }
    out
}

pub(crate) fn format_ack(ack: &ReadAck) -> String {
    format!(
        "thread {} read ({} cleared), cancel key: {}",
        ack.thread_id, ack.cleared, ack.dedup_key
    )
}

fn preview(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
    cut.push('…');
    cut
}
