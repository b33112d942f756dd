//! `notirelay status | reload`.

use crate::client::rpc_call;

pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "status", serde_json::json!({})).await?;
    print!("{}", format_status(&status));
    Ok(())
}

pub async fn cmd_reload(socket_path: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "reload_eligibility", serde_json::json!({})).await?;
    println!("eligible sources: {}", result["sources"]);
    Ok(())
}

pub(crate) fn format_status(status: &serde_json::Value) -> String {
    let stats = &status["stats"];
    let count = |v: &serde_json::Value| v.as_u64().unwrap_or(0);
    let filter = if status["eligibility_loaded"].as_bool() == Some(true) {
        "loaded"
    } else {
        "unloaded (dropping all events)"
    };
    format!(
        "threads: {} ({} unread)\n\
         filter: {filter}\n\
         ingested: {}  dropped: {}\n\
         relayed: {}  failed: {}  truncated: {}\n\
         version: {}\n",
        count(&status["threads"]),
        count(&status["unread"]),
        count(&stats["ingested"]),
        count(&stats["dropped"]),
        count(&stats["relayed"]),
        count(&stats["relay_failed"]),
        count(&stats["truncated"]),
        count(&status["version"]),
    )
}
