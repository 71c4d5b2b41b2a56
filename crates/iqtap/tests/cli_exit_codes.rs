#![cfg(all(unix, feature = "cli"))]

use std::process::Output;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const READY: &str = r#"{"message":"ready","name":"enb0","type":"ENB","version":"2025-12-12"}"#;

#[derive(Clone, Copy)]
enum Behavior {
    /// Reply to every request with the request itself.
    Echo,
    /// Reply with an error field set.
    Fail,
    /// Authenticate, then never reply.
    Silent,
    /// Never send `ready`.
    Mute,
}

/// One-connection WebSocket server on a free local port.
async fn serve(behavior: Behavior) -> String {
    serve_counting(behavior).await.0
}

/// Like [`serve`], also counting the text messages received.
async fn serve_counting(behavior: Behavior) -> (String, Arc<AtomicUsize>) {
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener has an address");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("client should connect");
        let mut ws = accept_async(stream).await.expect("handshake should succeed");
        if !matches!(behavior, Behavior::Mute) {
            ws.send(Message::Text(READY.to_string()))
                .await
                .expect("ready should be sent");
        }
        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else { continue };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut request: Value = serde_json::from_str(&text).expect("request is JSON");
            let reply = match behavior {
                Behavior::Echo => request,
                Behavior::Fail => {
                    request["error"] = json!("unsupported");
                    request
                }
                Behavior::Silent | Behavior::Mute => continue,
            };
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                break;
            }
        }
    });

    (addr.to_string(), received)
}

async fn iqtap(args: &[&str]) -> Output {
    let cwd = tempfile::tempdir().expect("temp dir");
    Command::new(env!("CARGO_BIN_EXE_iqtap"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .current_dir(cwd.path())
        .kill_on_drop(true)
        .output()
        .await
        .expect("iqtap should run")
}

#[tokio::test(flavor = "multi_thread")]
async fn replied_script_exits_zero() {
    let server = serve(Behavior::Echo).await;
    let output = iqtap(&["ws", &server, r#"{"message":"config_get"}"#]).await;

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let reply: Value = serde_json::from_str(stdout.lines().next().expect("one line"))
        .expect("reply is JSON");
    assert_eq!(reply["message"], "config_get");
    assert_eq!(reply["message_id"], "id#1");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_exits_one() {
    let server = serve(Behavior::Fail).await;
    let output = iqtap(&["ws", &server, r#"{"message":"cell_gain"}"#]).await;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: "), "stderr: {stderr}");
    assert!(stderr.contains("unsupported"), "stderr: {stderr}");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_tolerated_with_no_error() {
    let server = serve(Behavior::Fail).await;
    let output = iqtap(&["ws", "--no-error", &server, r#"{"message":"cell_gain"}"#]).await;
    assert_eq!(output.status.code(), Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_message_exits_twelve() {
    let server = serve(Behavior::Silent).await;
    let output = iqtap(&["ws", "-t", "1", &server, r#"{"message":"config_get"}"#]).await;
    assert_eq!(output.status.code(), Some(12));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_ready_exits_two() {
    let server = serve(Behavior::Mute).await;
    let output = iqtap(&["ws", "-t", "1", &server, r#"{"message":"config_get"}"#]).await;
    assert_eq!(output.status.code(), Some(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn usage_errors_exit_sixty_four() {
    let output = iqtap(&["ws"]).await;
    assert_eq!(output.status.code(), Some(64));

    let output = iqtap(&["ws", "127.0.0.1:1", "-w", "later"]).await;
    assert_eq!(output.status.code(), Some(64));

    // Checked before any connection attempt.
    let output = iqtap(&["dump", "127.0.0.1:1", "."]).await;
    assert_eq!(output.status.code(), Some(64));
}

#[tokio::test(flavor = "multi_thread")]
async fn loop_replays_the_script() {
    let (server, received) = serve_counting(Behavior::Echo).await;
    let output = iqtap(&["ws", "--loop", "2", &server, r#"{"message":"config_get"}"#]).await;

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(received.load(Ordering::SeqCst), 3);
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn options_may_follow_script_items() {
    let server = serve(Behavior::Echo).await;
    let output = iqtap(&["ws", &server, r#"{"message":"config_get"}"#, "-t", "5"]).await;
    assert_eq!(output.status.code(), Some(0));

    let server = serve(Behavior::Fail).await;
    let output = iqtap(&["ws", &server, r#"{"message":"cell_gain"}"#, "--no-error"]).await;
    assert_eq!(output.status.code(), Some(0));
}
