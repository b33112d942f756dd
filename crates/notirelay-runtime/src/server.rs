//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use notirelay_core::{RawEvent, ThreadId};

use crate::daemon::DaemonContext;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;
/// Application errors: unknown thread, reload failure.
const APP_ERROR: i64 = -32000;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, ctx: Arc<DaemonContext>) -> anyhow::Result<()> {
    let listener = bind_control_socket(Path::new(socket_path)).await?;
    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &ctx).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

/// Bind the daemon's control socket. The parent directory is private to
/// the user, a leftover socket from a dead daemon is replaced, and a path
/// with a live daemon behind it is refused.
async fn bind_control_socket(socket_path: &Path) -> anyhow::Result<UnixListener> {
    let dir = socket_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| anyhow::anyhow!("socket path {} has no directory", socket_path.display()))?;
    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, Permissions::from_mode(0o700))?;

    if socket_path.exists() {
        if UnixStream::connect(socket_path).await.is_ok() {
            anyhow::bail!("a notirelay daemon is already listening on {}", socket_path.display());
        }
        std::fs::remove_file(socket_path)?;
        tracing::info!(path = %socket_path.display(), "replaced stale control socket");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// One request line in, one response line out.
async fn handle_connection(stream: UnixStream, ctx: &DaemonContext) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let outcome = dispatch(ctx, method, &request["params"]).await;
    if let Err(err) = &outcome {
        tracing::debug!(method, code = err.code, "rpc error: {}", err.message);
    }

    let mut reply = serde_json::to_vec(&response(request["id"].clone(), outcome))?;
    reply.push(b'\n');
    writer.write_all(&reply).await?;
    Ok(())
}

fn response(id: Value, outcome: Result<Value, RpcError>) -> Value {
    match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
        Err(err) => json!({
            "jsonrpc": "2.0",
            "error": {"code": err.code, "message": err.message},
            "id": id,
        }),
    }
}

pub(crate) async fn dispatch(ctx: &DaemonContext, method: &str, params: &Value) -> Result<Value, RpcError> {
    match method {
        "raw_event" => {
            let event: RawEvent = serde_json::from_value(params.clone())
                .map_err(|e| RpcError::new(INVALID_PARAMS, format!("invalid event: {e}")))?;
            ctx.events
                .send(event)
                .await
                .map_err(|_| RpcError::new(INTERNAL_ERROR, "ingest queue closed"))?;
            Ok(json!({"queued": true}))
        }
        "list_threads" => to_result(ctx.engine.snapshot()),
        "mark_read" => {
            let id = params["thread_id"]
                .as_u64()
                .map(ThreadId)
                .ok_or_else(|| RpcError::new(INVALID_PARAMS, "thread_id must be an unsigned integer"))?;
            let ack = ctx
                .engine
                .mark_read(id)
                .ok_or_else(|| RpcError::new(APP_ERROR, format!("unknown thread {id}")))?;
            to_result(ack)
        }
        "sweep_read" => {
            let removed = ctx.engine.sweep_read();
            Ok(json!({"removed": removed}))
        }
        "reload_eligibility" => {
            let settings = ctx
                .settings
                .as_ref()
                .ok_or_else(|| RpcError::new(APP_ERROR, "no settings file configured"))?;
            let sources = ctx
                .engine
                .eligibility()
                .reload(settings)
                .map_err(|e| RpcError::new(APP_ERROR, e.to_string()))?;
            tracing::info!(sources, "eligible sources reloaded");
            Ok(json!({"sources": sources}))
        }
        "status" => Ok(json!({
            "threads": ctx.engine.thread_count(),
            "unread": ctx.engine.total_unread(),
            "version": ctx.version(),
            "eligibility_loaded": ctx.engine.eligibility().is_loaded(),
            "stats": ctx.engine.stats(),
        })),
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use notirelay_daemon::eligibility::EligibilityFilter;
    use notirelay_daemon::engine::AggregationEngine;
    use notirelay_daemon::settings::SettingsFile;
    use tokio::sync::mpsc;

    use crate::client::rpc_call;
    use crate::frame_relay::FrameRelay;

    fn context(settings: Option<SettingsFile>) -> (DaemonContext, mpsc::Receiver<RawEvent>) {
        let filter = EligibilityFilter::with_set(["wechat".to_owned()].into_iter().collect());
        let engine = AggregationEngine::new(FrameRelay::Log, Arc::new(filter));
        let (tx, rx) = mpsc::channel(8);
        (DaemonContext::new(engine, tx, settings), rx)
    }

    fn event(sender: &str, at: u64) -> RawEvent {
        RawEvent {
            source_id: "wechat".into(),
            sender: sender.into(),
            body: "hi".into(),
            occurred_at: at,
            dedup_key: format!("{sender}-{at}"),
        }
    }

    #[tokio::test]
    async fn raw_event_is_queued_not_applied() {
        let (ctx, mut rx) = context(None);
        let params = json!({
            "source_id": "wechat",
            "sender": "Alice",
            "body": "hi",
            "occurred_at": 5,
            "dedup_key": "k5",
        });
        let result = dispatch(&ctx, "raw_event", &params).await.expect("queued");
        assert_eq!(result, json!({"queued": true}));
        assert_eq!(rx.recv().await.expect("event").dedup_key, "k5");
        assert_eq!(ctx.engine.thread_count(), 0);
    }

    #[tokio::test]
    async fn raw_event_rejects_bad_params() {
        let (ctx, _rx) = context(None);
        let err = dispatch(&ctx, "raw_event", &json!({"sender": "x"}))
            .await
            .expect_err("missing fields");
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn mark_read_returns_dedup_key() {
        let (ctx, _rx) = context(None);
        ctx.engine.ingest(event("Alice", 1)).await;
        ctx.engine.ingest(event("Alice", 2)).await;
        let id = ctx.engine.snapshot()[0].id;

        let ack = dispatch(&ctx, "mark_read", &json!({"thread_id": id.0}))
            .await
            .expect("ack");
        assert_eq!(ack["dedup_key"], "Alice-2");
        assert_eq!(ack["cleared"], 2);

        let list = dispatch(&ctx, "list_threads", &Value::Null).await.expect("list");
        assert_eq!(list[0]["unread_count"], 0);

        let swept = dispatch(&ctx, "sweep_read", &Value::Null).await.expect("sweep");
        assert_eq!(swept["removed"], json!([id.0]));
        assert_eq!(ctx.engine.thread_count(), 0);
    }

    #[tokio::test]
    async fn mark_read_errors() {
        let (ctx, _rx) = context(None);
        let err = dispatch(&ctx, "mark_read", &json!({})).await.expect_err("no id");
        assert_eq!(err.code, INVALID_PARAMS);
        let err = dispatch(&ctx, "mark_read", &json!({"thread_id": 99}))
            .await
            .expect_err("unknown");
        assert_eq!(err.code, APP_ERROR);
    }

    #[tokio::test]
    async fn reload_reads_settings_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(br#"{"eligible_sources": ["line", "wechat"]}"#)
            .expect("write");
        let (ctx, _rx) = context(Some(SettingsFile::new(file.path())));

        let result = dispatch(&ctx, "reload_eligibility", &Value::Null)
            .await
            .expect("reload");
        assert_eq!(result["sources"], 2);
        assert!(ctx.engine.eligibility().is_eligible("line"));
    }

    #[tokio::test]
    async fn reload_without_settings_fails() {
        let (ctx, _rx) = context(None);
        let err = dispatch(&ctx, "reload_eligibility", &Value::Null)
            .await
            .expect_err("no settings");
        assert_eq!(err.code, APP_ERROR);
        assert!(ctx.engine.eligibility().is_eligible("wechat"));
    }

    #[tokio::test]
    async fn status_reports_counts() {
        let (ctx, _rx) = context(None);
        ctx.engine.ingest(event("Alice", 1)).await;
        ctx.engine.ingest(event("Bob", 2)).await;

        let status = dispatch(&ctx, "status", &Value::Null).await.expect("status");
        assert_eq!(status["threads"], 2);
        assert_eq!(status["unread"], 2);
        assert_eq!(status["version"], 2);
        assert_eq!(status["eligibility_loaded"], true);
        assert_eq!(status["stats"]["ingested"], 2);
    }

    #[tokio::test]
    async fn unknown_method() {
        let (ctx, _rx) = context(None);
        let err = dispatch(&ctx, "nope", &Value::Null).await.expect_err("unknown");
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn control_socket_replaces_stale_and_refuses_live() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notirelayd.sock");
        std::fs::write(&path, b"").expect("leftover file");

        let listener = bind_control_socket(&path).await.expect("stale replaced");
        let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let err = bind_control_socket(&path).await.expect_err("live daemon");
        assert!(err.to_string().contains("already listening"));
        drop(listener);
    }

    #[test]
    fn error_response_shape() {
        let reply = response(json!(3), Err(RpcError::new(METHOD_NOT_FOUND, "method not found")));
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["id"], 3);
        assert!(reply.get("result").is_none());
    }

    #[tokio::test]
    async fn socket_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("run/notirelayd.sock");
        let socket = socket.to_str().expect("utf8 path").to_owned();
        let (ctx, _rx) = context(None);
        let ctx = Arc::new(ctx);

        let server_socket = socket.clone();
        let server = tokio::spawn(async move { run_server(&server_socket, ctx).await });

        let mut status = None;
        for _ in 0..100 {
            if let Ok(value) = rpc_call(&socket, "status", Value::Null).await {
                status = Some(value);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = status.expect("daemon answered");
        assert_eq!(status["threads"], 0);

        let err = rpc_call(&socket, "nope", Value::Null).await.expect_err("unknown");
        assert!(err.to_string().contains("-32601"));

        server.abort();
    }
}
