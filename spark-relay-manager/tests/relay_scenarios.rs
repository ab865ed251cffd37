use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use spark_relay_core::stream::SinkHandle;
use spark_relay_core::{
    ChannelSink, ConversationHistory, EventSink, RelayEvent, RelayRegistry, Role,
};
use spark_relay_manager::StreamRelay;
use spark_relay_providers::{ChatSettings, SessionState, UrlSigner};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;

/// Single-connection upstream that answers the request frame with canned replies
struct MockUpstream {
    base_url: String,
    request_rx: mpsc::UnboundedReceiver<Value>,
    task: JoinHandle<bool>,
}

impl MockUpstream {
    async fn spawn(replies: Vec<Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream listener");
        let addr = listener.local_addr().expect("get mock upstream address");
        let base_url = format!("http://{}/v3.5/chat", addr);
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        // Resolves to whether the relay closed the socket itself.
        let task = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return false;
            };
            let Ok(ws) = accept_async(stream).await else {
                return false;
            };
            let (mut write, mut read) = ws.split();

            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                        let _ = request_tx.send(parsed);
                    }
                }
                _ => return false,
            }

            for reply in replies {
                if write.send(WsMessage::Text(reply.to_string())).await.is_err() {
                    return false;
                }
            }

            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Close(_)) => return true,
                    Ok(_) => {}
                    Err(_) => return false,
                }
            }
            false
        });

        Self {
            base_url,
            request_rx,
            task,
        }
    }

    async fn recv_request(&mut self) -> Value {
        timeout(Duration::from_secs(3), self.request_rx.recv())
            .await
            .expect("wait for request frame")
            .expect("receive request frame")
    }

    async fn closed_by_relay(self) -> bool {
        timeout(Duration::from_secs(3), self.task)
            .await
            .expect("mock upstream finished")
            .expect("mock upstream task")
    }
}

/// Sink that records every call made on it
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<RelayEvent>>,
    completions: AtomicUsize,
    failures: AtomicUsize,
    done: CancellationToken,
}

impl RecordingSink {
    /// Simulates the subscriber-side inactivity timeout
    fn time_out(&self) {
        self.done.cancel();
    }

    fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: RelayEvent) -> spark_relay_core::Result<()> {
        if self.done.is_cancelled() {
            return Err(spark_relay_core::Error::Sink("terminated".to_string()));
        }
        self.events.lock().push(event);
        Ok(())
    }

    fn complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
        self.done.cancel();
    }

    fn fail(&self, _error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.done.cancel();
    }

    async fn closed(&self) {
        self.done.cancelled().await;
    }

    fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }
}

fn frame(code: i32, message: &str, status: i32, content: Option<&str>) -> Value {
    let mut value = json!({
        "header": {"code": code, "message": message, "sid": "cht000cb", "status": status}
    });
    if let Some(content) = content {
        value["payload"] = json!({
            "choices": {"status": status, "seq": 0, "text": [
                {"role": "assistant", "content": content, "index": 0}
            ]}
        });
    }
    value
}

fn relay_for(upstream: &MockUpstream) -> StreamRelay {
    StreamRelay::new(
        UrlSigner::new(&upstream.base_url, "test-key", "test-secret"),
        ChatSettings {
            app_id: "test-app".to_string(),
            ..ChatSettings::default()
        },
        Arc::new(ConversationHistory::default()),
        Arc::new(RelayRegistry::new()),
    )
    .with_connect_timeout(Duration::from_secs(3))
}

async fn finish(handle: JoinHandle<SessionState>) -> SessionState {
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("session finished in time")
        .expect("session task")
}

async fn drain(receiver: &mut spark_relay_core::SinkReceiver) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(3), receiver.recv())
        .await
        .expect("sink event in time")
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn streamed_reply_reaches_sink_in_order_and_completes() {
    let mut upstream = MockUpstream::spawn(vec![
        frame(0, "Success", 1, Some("Hi")),
        frame(0, "Success", 2, Some(" there")),
    ])
    .await;
    let relay = relay_for(&upstream);
    let (sink, mut receiver) = ChannelSink::new(16);

    let handle = relay
        .start("hello", "s1", Arc::new(sink))
        .await
        .expect("relay started");

    let request = upstream.recv_request().await;
    assert_eq!(request["header"]["app_id"], "test-app");
    assert_eq!(request["header"]["uid"].as_str().map(str::len), Some(10));
    assert_eq!(request["parameter"]["chat"]["domain"], "generalv3.5");
    assert_eq!(
        request["payload"]["message"]["text"],
        json!([{"role": "user", "content": "hello"}])
    );

    assert_eq!(finish(handle).await, SessionState::Completed);
    assert_eq!(
        drain(&mut receiver).await,
        vec![
            RelayEvent::message("Hi"),
            RelayEvent::message(" there"),
            RelayEvent::Complete,
        ]
    );
    assert_eq!(
        RelayEvent::Complete.data(),
        json!({"content": "", "finished": true}).to_string()
    );

    let turns = relay.history().snapshot();
    let last = turns.last().expect("assistant turn");
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Hi there");
    assert!(!relay.registry().contains("s1"));
    assert!(upstream.closed_by_relay().await);
}

#[tokio::test]
async fn upstream_error_code_yields_single_error_event() {
    let upstream = MockUpstream::spawn(vec![frame(1, "quota exceeded", 2, None)]).await;
    let relay = relay_for(&upstream);
    let (sink, mut receiver) = ChannelSink::new(16);

    let handle = relay
        .start("hello", "s2", Arc::new(sink))
        .await
        .expect("relay started");

    assert_eq!(finish(handle).await, SessionState::Failed);
    let events = drain(&mut receiver).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        RelayEvent::Error { message } => assert!(message.contains("quota exceeded")),
        other => panic!("expected error event, got {:?}", other),
    }
    assert!(!relay.registry().contains("s2"));
}

#[tokio::test]
async fn sink_timeout_before_first_frame_detaches_session() {
    // Never replies, so the session sits in streaming until the sink goes away.
    let mut upstream = MockUpstream::spawn(Vec::new()).await;
    let relay = relay_for(&upstream);
    let sink = Arc::new(RecordingSink::default());
    let handle: SinkHandle = sink.clone();

    let session = relay
        .start("hello", "s3", handle)
        .await
        .expect("relay started");
    upstream.recv_request().await;
    assert!(relay.registry().contains("s3"));

    sink.time_out();

    assert_eq!(finish(session).await, SessionState::Closed);
    assert!(!relay.registry().contains("s3"));
    assert!(sink.events().is_empty());
    assert_eq!(sink.completions.load(Ordering::SeqCst), 0);
    assert_eq!(sink.failures.load(Ordering::SeqCst), 0);
    assert!(upstream.closed_by_relay().await);
}

#[tokio::test]
async fn client_disconnect_mid_stream_closes_upstream() {
    let upstream = MockUpstream::spawn(vec![frame(0, "Success", 1, Some("partial"))]).await;
    let relay = relay_for(&upstream);
    let (sink, mut receiver) = ChannelSink::new(16);

    let session = relay
        .start("hello", "s4", Arc::new(sink))
        .await
        .expect("relay started");

    assert_eq!(
        timeout(Duration::from_secs(3), receiver.recv()).await.unwrap(),
        Some(RelayEvent::message("partial"))
    );
    drop(receiver);

    assert_eq!(finish(session).await, SessionState::Closed);
    assert!(relay.registry().is_empty());
    assert!(upstream.closed_by_relay().await);
}

#[tokio::test]
async fn second_question_carries_earlier_questions_as_context() {
    let first = MockUpstream::spawn(vec![frame(0, "Success", 2, Some("one"))]).await;
    let history = Arc::new(ConversationHistory::default());
    let registry = Arc::new(RelayRegistry::new());
    let relay = StreamRelay::new(
        UrlSigner::new(&first.base_url, "k", "s"),
        ChatSettings::default(),
        Arc::clone(&history),
        Arc::clone(&registry),
    );
    let (sink, _receiver) = ChannelSink::new(16);
    let handle = relay.start("first?", "a", Arc::new(sink)).await.unwrap();
    assert_eq!(finish(handle).await, SessionState::Completed);

    let mut second = MockUpstream::spawn(vec![frame(0, "Success", 2, Some("two"))]).await;
    let relay = StreamRelay::new(
        UrlSigner::new(&second.base_url, "k", "s"),
        ChatSettings::default(),
        Arc::clone(&history),
        registry,
    );
    let (sink, _receiver) = ChannelSink::new(16);
    let handle = relay.start("second?", "b", Arc::new(sink)).await.unwrap();

    let request = second.recv_request().await;
    assert_eq!(
        request["payload"]["message"]["text"],
        json!([
            {"role": "user", "content": "first?"},
            {"role": "user", "content": "second?"}
        ])
    );
    assert_eq!(finish(handle).await, SessionState::Completed);

    let contents: Vec<String> = history.snapshot().into_iter().map(|t| t.content).collect();
    assert_eq!(contents, vec!["first?", "one", "second?", "two"]);
}
