//! Bridge round-trip tests.
//!
//! Wires a server dispatcher and a page dispatcher together over in-process
//! links and checks correlation, routing and failure reporting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::timeout;

use page_mcp_bridge::channel::{self, Channel, FrameReceiver, PageConnection};
use page_mcp_bridge::envelope::{Envelope, Frame, Topic};
use page_mcp_bridge::tools::{
    page_tool, read_console, take_screenshot, CapturedScreenshot, ConsoleCapture, ConsoleLevel,
    PageTool, ReadConsoleTool, ScreenCapture, TakeScreenshotTool, ToolDescriptor, ToolSet,
};
use page_mcp_bridge::{Error, PageDispatcher, Result, ServerDispatcher};

const WAIT: Duration = Duration::from_secs(5);

/// Server and page connected both ways.
fn connect(tools: ToolSet, page_tools: Vec<Arc<dyn PageTool>>) -> (Arc<ServerDispatcher>, PageDispatcher) {
    let (to_page, page_rx) = channel::link();
    let (to_server, mut server_rx) = channel::link();

    let server = Arc::new(ServerDispatcher::new(tools, Arc::new(to_page)));
    let page = PageDispatcher::activate(Arc::new(to_server), page_tools).unwrap();

    let page_loop = page.clone();
    tokio::spawn(async move { page_loop.run(page_rx).await });

    let server_loop = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(frame) = server_rx.recv().await {
            server_loop.handle_frame(frame);
        }
    });

    (server, page)
}

/// A page whose outbound frames the test reads directly.
fn observed_page(page_tools: Vec<Arc<dyn PageTool>>) -> (PageDispatcher, FrameReceiver) {
    let (to_server, mut server_rx) = channel::link();
    let page = PageDispatcher::activate(Arc::new(to_server), page_tools).unwrap();
    let ready = server_rx.try_recv().unwrap();
    assert_eq!(ready.topic(), Some(Topic::BridgeReady));
    (page, server_rx)
}

async fn next_frame(rx: &mut FrameReceiver) -> Frame {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("channel closed")
}

fn tool_set(names: &[&str]) -> ToolSet {
    ToolSet::new(names.iter().map(|n| ToolDescriptor::new(*n, format!("{n} tool")))).unwrap()
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn test_round_trip_identity() {
    let echo = page_tool("echo", |_ctx, params: Value| async move {
        assert_eq!(params, json!({"a": 1}));
        Ok(json!({"b": 2}))
    });
    let (server, _page) = connect(tool_set(&["echo"]), vec![echo]);

    let result = timeout(WAIT, server.dispatch_tool_call("echo", Some(json!({"a": 1}))))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result, json!({"b": 2}));
    assert_eq!(server.pending_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_settle_independently() {
    let sleepy = page_tool("sleepy", |_ctx, params: Value| async move {
        let ms = params["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept": ms }))
    });
    let (server, _page) = connect(tool_set(&["sleepy"]), vec![sleepy]);

    let (slow, fast, medium) = tokio::join!(
        server.dispatch_tool_call("sleepy", Some(json!({"ms": 60}))),
        server.dispatch_tool_call("sleepy", Some(json!({"ms": 5}))),
        server.dispatch_tool_call("sleepy", Some(json!({"ms": 30}))),
    );

    assert_eq!(slow.unwrap(), json!({"slept": 60}));
    assert_eq!(fast.unwrap(), json!({"slept": 5}));
    assert_eq!(medium.unwrap(), json!({"slept": 30}));
    assert_eq!(server.pending_calls(), 0);
}

#[tokio::test]
async fn test_handler_failure_rejects_call() {
    let broken = page_tool("broken", |_ctx, _params| async move {
        Err::<Value, _>(Error::HandlerFailure("kaput".into()))
    });
    let (server, _page) = connect(tool_set(&["broken"]), vec![broken]);

    let err = server.dispatch_tool_call("broken", None).await.unwrap_err();
    assert!(matches!(err, Error::CallRejected(ref message) if message == "kaput"), "{err:?}");
}

#[tokio::test]
async fn test_handler_panic_is_reported() {
    let panicky = page_tool("panicky", |_ctx, _params| async move {
        if true {
            panic!("handler blew up");
        }
        Ok(Value::Null)
    });
    let (server, _page) = connect(tool_set(&["panicky"]), vec![panicky]);

    let err = timeout(WAIT, server.dispatch_tool_call("panicky", None))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.to_string().contains("panicked"), "{err}");
}

// ============================================================================
// Server callbacks
// ============================================================================

#[tokio::test]
async fn test_server_callback_routing() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let descriptor = ToolDescriptor::new("take-screenshot", "capture").with_server_method(
        "saveFile",
        move |params: Value| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(params);
                Ok(json!({"path": "/tmp/shot.png"}))
            }
        },
    );
    let handler = page_tool("take-screenshot", |ctx, _params| async move {
        let saved = ctx.server().call("saveFile", json!({"x": 1})).await?;
        Ok(json!({ "saved": saved }))
    });
    let (server, page) = connect(ToolSet::new([descriptor]).unwrap(), vec![handler]);

    let result = timeout(WAIT, server.dispatch_tool_call("take-screenshot", None))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result, json!({"saved": {"path": "/tmp/shot.png"}}));
    assert_eq!(*calls.lock().unwrap(), vec![json!({"x": 1})]);
    assert_eq!(page.pending_server_calls(), 0);
}

#[tokio::test]
async fn test_proxy_names_calls_tool_colon_method() {
    let handler = page_tool("take-screenshot", |ctx, _params| async move {
        ctx.server().call("saveFile", json!({"x": 1})).await
    });
    let (page, mut outbound) = observed_page(vec![handler]);

    page.handle_frame(Frame::new(
        Topic::ToolCall,
        Some(Envelope::request("call-1", "take-screenshot", None)),
    ));

    let server_call = next_frame(&mut outbound).await;
    assert_eq!(server_call.topic(), Some(Topic::ToolServerCall));
    let envelope = server_call.data.unwrap();
    assert_eq!(envelope.name.as_deref(), Some("take-screenshot:saveFile"));
    assert_eq!(envelope.params, Some(json!({"x": 1})));
    assert_eq!(page.pending_server_calls(), 1);

    page.handle_frame(Frame::new(
        Topic::ToolServerResult,
        Some(Envelope::response(envelope.id, Ok(json!({"ok": true})))),
    ));

    let tool_result = next_frame(&mut outbound).await;
    assert_eq!(tool_result.topic(), Some(Topic::ToolResult));
    let data = tool_result.data.unwrap();
    assert_eq!(data.id, "call-1");
    assert_eq!(data.result, Some(json!({"ok": true})));
    assert_eq!(page.pending_server_calls(), 0);
}

#[tokio::test]
async fn test_server_method_error_reaches_handler() {
    let descriptor = ToolDescriptor::new("writer", "writes").with_server_method(
        "write",
        |_params: Value| async move { Err::<Value, _>(Error::HandlerFailure("disk full".into())) },
    );
    let handler = page_tool("writer", |ctx, _params| async move {
        ctx.server().call("write", Value::Null).await
    });
    let (server, _page) = connect(ToolSet::new([descriptor]).unwrap(), vec![handler]);

    let err = server.dispatch_tool_call("writer", None).await.unwrap_err();
    assert_eq!(err.to_string(), "disk full");
}

#[tokio::test]
async fn test_missing_method_yields_error_envelope() {
    let descriptor = ToolDescriptor::new("take-screenshot", "capture")
        .with_server_method("saveFile", |_params: Value| async move { Ok(json!({})) });
    let (to_page, mut page_rx) = channel::link();
    let server = ServerDispatcher::new(ToolSet::new([descriptor]).unwrap(), Arc::new(to_page));

    let response = server
        .handle_server_call(Envelope::request("9", "take-screenshot:deleteEverything", Some(json!({}))))
        .await;
    assert_eq!(response.error.as_deref(), Some("Method not found: deleteEverything"));
    assert!(response.result.is_none());

    let sent = page_rx.try_recv().unwrap();
    assert_eq!(sent.topic(), Some(Topic::ToolServerResult));
    assert_eq!(sent.data, Some(response));

    let tool = server.tools().get("take-screenshot").unwrap();
    assert_eq!(tool.server_method_names(), vec!["saveFile"]);
}

#[tokio::test]
async fn test_unknown_tool_in_server_call() {
    let (to_page, _page_rx) = channel::link();
    let server = ServerDispatcher::new(tool_set(&["known"]), Arc::new(to_page));

    let response = server
        .handle_server_call(Envelope::request("3", "ghost:save", None))
        .await;
    assert_eq!(response.error.as_deref(), Some("Tool not found: ghost"));
}

// ============================================================================
// Page-side failures
// ============================================================================

#[tokio::test]
async fn test_missing_tool_yields_error_envelope() {
    let (page, mut outbound) = observed_page(Vec::new());

    page.handle_frame(Frame::new(
        Topic::ToolCall,
        Some(Envelope::request("42", "nonexistent", Some(json!({})))),
    ));

    let frame = next_frame(&mut outbound).await;
    assert_eq!(frame.topic(), Some(Topic::ToolResult));
    let value = serde_json::to_value(frame.data.unwrap()).unwrap();
    assert_eq!(value, json!({"id": "42", "error": "Tool not found: nonexistent"}));
}

#[tokio::test]
async fn test_duplicate_page_tools_are_rejected() {
    let first = page_tool("echo", |_ctx, _params| async move { Ok(json!("first")) });
    let second = page_tool("echo", |_ctx, _params| async move { Ok(json!("second")) });
    let (to_server, mut server_rx) = channel::link();

    let err = PageDispatcher::activate(Arc::new(to_server), vec![first, second]).unwrap_err();
    assert_eq!(err.to_string(), "invalid parameters: duplicate tool name: echo");
    assert!(server_rx.try_recv().is_err(), "bridge-ready must not be sent");
}

#[tokio::test]
async fn test_unmatched_server_result_is_ignored() {
    let (page, mut outbound) = observed_page(Vec::new());

    page.handle_frame(Frame::new(
        Topic::ToolServerResult,
        Some(Envelope::response("stale-id", Ok(json!(1)))),
    ));

    assert_eq!(page.pending_server_calls(), 0);
    assert!(outbound.try_recv().is_err());
}

// ============================================================================
// Channel loss and timeouts
// ============================================================================

#[tokio::test]
async fn test_no_page_connected() {
    let page = Arc::new(PageConnection::new());
    let server = ServerDispatcher::new(tool_set(&["echo"]), page);

    let err = server.dispatch_tool_call("echo", None).await.unwrap_err();
    assert!(matches!(err, Error::ChannelUnavailable(_)), "{err:?}");
    assert_eq!(server.pending_calls(), 0);
}

#[tokio::test]
async fn test_unmatched_tool_result_leaves_pending_calls_alone() {
    let (to_page, mut page_rx) = channel::link();
    let server = Arc::new(ServerDispatcher::new(tool_set(&["echo"]), Arc::new(to_page)));

    let call = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.dispatch_tool_call("echo", None).await }
    });
    let request = next_frame(&mut page_rx).await.data.unwrap();

    server.handle_frame(Frame::new(
        Topic::ToolResult,
        Some(Envelope::response("not-a-real-id", Ok(json!("late")))),
    ));
    assert_eq!(server.pending_calls(), 1);

    server.handle_frame(Frame::new(
        Topic::ToolResult,
        Some(Envelope::response(request.id.clone(), Ok(json!("on time")))),
    ));
    assert_eq!(call.await.unwrap().unwrap(), json!("on time"));

    // A duplicate of the same result is dropped.
    server.handle_frame(Frame::new(
        Topic::ToolResult,
        Some(Envelope::response(request.id, Ok(json!("again")))),
    ));
    assert_eq!(server.pending_calls(), 0);
}

#[tokio::test]
async fn test_disconnected_page_orphans_call() {
    let page = Arc::new(PageConnection::new());
    let (connection, frames) = page.attach();
    let channel: Arc<dyn Channel> = page.clone();
    let server = Arc::new(ServerDispatcher::new(tool_set(&["echo"]), channel));

    let call = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.dispatch_tool_call("echo", None).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(frames);
    page.detach(connection);

    let still_waiting = timeout(Duration::from_millis(100), call).await;
    assert!(still_waiting.is_err(), "orphaned call must not settle");
    assert_eq!(server.pending_calls(), 1);
}

#[tokio::test]
async fn test_call_timeout_withdraws_call() {
    let stuck = page_tool("stuck", |_ctx, _params| async move {
        futures::future::pending::<()>().await;
        Ok(Value::Null)
    });
    let (to_page, page_rx) = channel::link();
    let (to_server, mut server_rx) = channel::link();
    let server = Arc::new(
        ServerDispatcher::new(tool_set(&["stuck"]), Arc::new(to_page))
            .with_call_timeout(Some(Duration::from_millis(50))),
    );
    let page = PageDispatcher::activate(Arc::new(to_server), vec![stuck]).unwrap();
    tokio::spawn(async move { page.run(page_rx).await });
    let server_loop = Arc::clone(&server);
    tokio::spawn(async move {
        while let Some(frame) = server_rx.recv().await {
            server_loop.handle_frame(frame);
        }
    });

    let err = server.dispatch_tool_call("stuck", None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { millis: 50, .. }), "{err:?}");
    assert_eq!(server.pending_calls(), 0);
}

// ============================================================================
// Built-in tools
// ============================================================================

struct FakeCapture {
    save_to_disk: bool,
}

#[async_trait]
impl ScreenCapture for FakeCapture {
    async fn capture_screenshot(&self) -> Result<CapturedScreenshot> {
        Ok(CapturedScreenshot {
            data_url: "data:image/jpeg;base64,aGVsbG8=".into(),
            quality: 0.8,
            save_to_disk: self.save_to_disk,
        })
    }
}

#[tokio::test]
async fn test_read_console_tail() {
    let capture = ConsoleCapture::new();
    capture.record(ConsoleLevel::Log, vec![json!("first")]);
    capture.record(ConsoleLevel::Error, vec![json!("second"), json!(2)]);

    let tools = ToolSet::new([read_console::descriptor()]).unwrap();
    let tool: Arc<dyn PageTool> = Arc::new(ReadConsoleTool::new(Arc::clone(&capture)));
    let (server, page) = connect(tools, vec![tool]);
    assert_eq!(page.components().tags(), vec!["read-console-element".to_owned()]);

    let result = server
        .dispatch_tool_call("read-console", Some(json!({"tail": "1"})))
        .await
        .unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.ends_with("[ERROR] second 2"), "{text}");
    assert!(!text.contains("first"));

    capture.clear();
    let result = server.dispatch_tool_call("read-console", None).await.unwrap();
    assert_eq!(result["content"][0]["text"], "No console logs found.");
}

#[tokio::test]
async fn test_take_screenshot_saves_through_server() {
    let dir = tempfile::tempdir().unwrap();
    let tools = ToolSet::new([take_screenshot::descriptor(dir.path().to_path_buf())]).unwrap();
    let capture: Arc<dyn ScreenCapture> = Arc::new(FakeCapture { save_to_disk: true });
    let tool: Arc<dyn PageTool> = Arc::new(TakeScreenshotTool::new(capture));
    let (server, _page) = connect(tools, vec![tool]);

    let result = timeout(WAIT, server.dispatch_tool_call("take-screenshot", None))
        .await
        .unwrap()
        .unwrap();

    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Screenshot of current browser tab captured (quality: 0.8, saved to: "));
    assert_eq!(result["content"][1], json!({"type": "image", "mimeType": "image/jpeg", "data": "aGVsbG8="}));

    let saved: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(saved.len(), 1);
}

#[tokio::test]
async fn test_take_screenshot_without_saving() {
    let dir = tempfile::tempdir().unwrap();
    let tools = ToolSet::new([take_screenshot::descriptor(dir.path().to_path_buf())]).unwrap();
    let capture: Arc<dyn ScreenCapture> = Arc::new(FakeCapture { save_to_disk: false });
    let tool: Arc<dyn PageTool> = Arc::new(TakeScreenshotTool::new(capture));
    let (server, _page) = connect(tools, vec![tool]);

    let result = server.dispatch_tool_call("take-screenshot", None).await.unwrap();
    assert_eq!(
        result["content"][0]["text"],
        "Screenshot of current browser tab captured (quality: 0.8)"
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_component_fails_call() {
    let tools = ToolSet::new([read_console::descriptor()]).unwrap();
    let bare = page_tool("read-console", |ctx, _params| async move {
        ctx.require_component::<ConsoleCapture>()?;
        Ok(Value::Null)
    });
    let (server, _page) = connect(tools, vec![bare]);

    let err = server.dispatch_tool_call("read-console", None).await.unwrap_err();
    assert_eq!(err.to_string(), "component read-console-element is not mounted");
}
