//! Integration tests for the consultation socket: join, send_message delivery,
//! error events, notifications, ping/pong and disconnect cleanup.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use consult_server::chat::payload::NewMessage;
use consult_server::notify::{
    DispatchSettings, NotificationDispatcher, NotificationProvider, NotificationTask, NotifyError,
};
use consult_server::state::AppState;
use consult_server::store::{Deadline, MessageStore, PersistedMessage, StoreError};

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Records every notification it is asked to send.
#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<NotificationTask>>,
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    async fn send(&self, task: &NotificationTask) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(task.clone());
        Ok(())
    }
}

/// Message store whose database cannot be reached.
struct UnreachableStore;

impl MessageStore for UnreachableStore {
    fn append(
        &self,
        _message: &NewMessage,
        _deadline: &Deadline,
    ) -> Result<PersistedMessage, StoreError> {
        Err(StoreError::Persistence("unable to open database file".to_string()))
    }
}

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    provider: Arc<RecordingProvider>,
    _data_dir: tempfile::TempDir,
}

/// Start the server on a random port. `store` replaces the SQLite store when given.
async fn start_test_server(store: Option<Arc<dyn MessageStore>>) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let db = consult_server::db::init_db(&data_dir).expect("Failed to init DB");

    let provider = Arc::new(RecordingProvider::default());
    let (notifier, _dispatcher) =
        NotificationDispatcher::start(provider.clone(), DispatchSettings::default());

    let timeout = Duration::from_secs(5);
    let state = match store {
        Some(store) => AppState::with_store(db, store, notifier, timeout),
        None => AppState::new(db, notifier, timeout),
    };

    let app = consult_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        provider,
        _data_dir: tmp_dir,
    }
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws_stream, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

async fn send_event(ws: &mut WsStream, event: &str, data: Value) {
    ws.send(Message::text(json!({"event": event, "data": data}).to_string()))
        .await
        .expect("Failed to send event");
}

/// Connect and join the room for `user_id`, waiting until the server has processed the join.
async fn connect_as(server: &TestServer, user_id: &str) -> WsStream {
    let before = server.state.connections.room_size(user_id);
    let mut ws = connect(server.addr).await;
    send_event(&mut ws, "join", json!({"user_id": user_id})).await;
    wait_until(|| server.state.connections.room_size(user_id) > before).await;
    ws
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 2s");
}

/// Next JSON event, or `None` if nothing arrives within `wait`.
async fn next_event(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("server sent invalid JSON"))
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("unexpected frame: {:?}", other),
            Err(_) => return None,
        }
    }
}

fn hello_payload() -> Value {
    json!({
        "consultation_id": "C1",
        "sender_id": "S1",
        "sender_role": "patient",
        "message": "hello",
        "receiver_id": "R1",
    })
}

const QUIET: Duration = Duration::from_millis(300);
const EXPECT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_message_reaches_connected_recipient_and_schedules_push() {
    let server = start_test_server(None).await;
    let mut r1 = connect_as(&server, "R1").await;
    let mut s1 = connect_as(&server, "S1").await;

    send_event(&mut s1, "send_message", hello_payload()).await;

    let event = next_event(&mut r1, EXPECT).await.expect("R1 should receive the message");
    assert_eq!(
        event,
        json!({
            "event": "new_message",
            "data": {"consultation_id": "C1", "sender_id": "S1", "message": "hello"}
        })
    );
    assert!(next_event(&mut s1, QUIET).await.is_none(), "sender must not get an error");
    assert!(next_event(&mut r1, QUIET).await.is_none(), "exactly one copy");

    wait_until(|| !server.provider.sent.lock().unwrap().is_empty()).await;
    assert_eq!(
        *server.provider.sent.lock().unwrap(),
        vec![NotificationTask::new(
            "R1",
            "New Message",
            "You received a new consultation message"
        )]
    );

    // The message is durable and readable through the history endpoint.
    let history: Value = reqwest::get(format!(
        "http://{}/api/consultations/C1/messages",
        server.addr
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(history["has_more"], json!(false));
    assert_eq!(history["messages"][0]["message"], json!("hello"));
    assert_eq!(history["messages"][0]["sender_role"], json!("patient"));
    assert_eq!(history["messages"][0]["receiver_id"], json!("R1"));
    assert_eq!(history["messages"][0]["server_sequence"], json!(1));
}

#[tokio::test]
async fn test_missing_field_returns_invalid_payload_to_sender_only() {
    let server = start_test_server(None).await;
    let mut r1 = connect_as(&server, "R1").await;
    let mut s1 = connect_as(&server, "S1").await;

    let mut payload = hello_payload();
    payload.as_object_mut().unwrap().remove("receiver_id");
    send_event(&mut s1, "send_message", payload).await;

    assert_eq!(
        next_event(&mut s1, EXPECT).await,
        Some(json!({"event": "error", "data": {"message": "Invalid message payload"}}))
    );
    assert!(next_event(&mut s1, QUIET).await.is_none(), "exactly one error");
    assert!(next_event(&mut r1, QUIET).await.is_none());
    assert!(server.provider.sent.lock().unwrap().is_empty());

    let count: i64 = server
        .state
        .db
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_unreachable_store_returns_database_error() {
    let server = start_test_server(Some(Arc::new(UnreachableStore))).await;
    let mut r1 = connect_as(&server, "R1").await;
    let mut s1 = connect_as(&server, "S1").await;

    send_event(&mut s1, "send_message", hello_payload()).await;

    assert_eq!(
        next_event(&mut s1, EXPECT).await,
        Some(json!({"event": "error", "data": {"message": "Database error"}}))
    );
    assert!(next_event(&mut r1, QUIET).await.is_none(), "R1 must receive nothing");
    assert!(server.provider.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_join_twice_delivers_once() {
    let server = start_test_server(None).await;
    let mut r1 = connect_as(&server, "R1").await;
    send_event(&mut r1, "join", json!({"user_id": "R1"})).await;
    let mut s1 = connect_as(&server, "S1").await;

    send_event(&mut s1, "send_message", hello_payload()).await;

    assert!(next_event(&mut r1, EXPECT).await.is_some());
    assert!(next_event(&mut r1, QUIET).await.is_none());
    assert_eq!(server.state.connections.room_size("R1"), 1);
}

#[tokio::test]
async fn test_offline_recipient_still_gets_push() {
    let server = start_test_server(None).await;
    let mut s1 = connect_as(&server, "S1").await;

    send_event(&mut s1, "send_message", hello_payload()).await;

    assert!(next_event(&mut s1, QUIET).await.is_none());
    wait_until(|| server.provider.sent.lock().unwrap().len() == 1).await;
}

#[tokio::test]
async fn test_join_without_user_id_is_ignored() {
    let server = start_test_server(None).await;
    let mut ws = connect(server.addr).await;

    send_event(&mut ws, "join", json!({"name": "R1"})).await;
    ws.send(Message::text("not json")).await.unwrap();
    send_event(&mut ws, "typing", json!({})).await;
    assert!(next_event(&mut ws, QUIET).await.is_none());

    // Connection is still alive and answers pings.
    ws.send(Message::Ping(vec![42, 43, 44].into())).await.unwrap();
    match tokio::time::timeout(EXPECT, ws.next()).await {
        Ok(Some(Ok(Message::Pong(data)))) => assert_eq!(data.as_ref(), &[42, 43, 44]),
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_numeric_identities_are_accepted() {
    let server = start_test_server(None).await;
    let mut r1 = connect(server.addr).await;
    send_event(&mut r1, "join", json!({"user_id": 9})).await;
    wait_until(|| server.state.connections.room_size("9") == 1).await;
    let mut s1 = connect_as(&server, "7").await;

    send_event(
        &mut s1,
        "send_message",
        json!({
            "consultation_id": 12,
            "sender_id": 7,
            "sender_role": "provider",
            "message": "drink water",
            "receiver_id": 9,
        }),
    )
    .await;

    assert_eq!(
        next_event(&mut r1, EXPECT).await,
        Some(json!({
            "event": "new_message",
            "data": {"consultation_id": "12", "sender_id": "7", "message": "drink water"}
        }))
    );
}

#[tokio::test]
async fn test_connection_cleanup_on_disconnect() {
    let server = start_test_server(None).await;
    let mut r1 = connect_as(&server, "R1").await;
    assert_eq!(server.state.connections.connection_count(), 1);

    r1.send(Message::Close(None)).await.expect("Failed to send close");
    drop(r1);

    wait_until(|| server.state.connections.connection_count() == 0).await;
    assert_eq!(server.state.connections.room_size("R1"), 0);

    // A message sent while R1 is offline is still persisted and pushed.
    let mut s1 = connect_as(&server, "S1").await;
    send_event(&mut s1, "send_message", hello_payload()).await;
    wait_until(|| server.provider.sent.lock().unwrap().len() == 1).await;
}

#[tokio::test]
async fn test_messages_in_one_consultation_keep_send_order() {
    let server = start_test_server(None).await;
    let mut r1 = connect_as(&server, "R1").await;
    let mut s1 = connect_as(&server, "S1").await;

    for i in 0..5 {
        let mut payload = hello_payload();
        payload["message"] = json!(format!("m{i}"));
        send_event(&mut s1, "send_message", payload).await;
    }

    for i in 0..5 {
        let event = next_event(&mut r1, EXPECT).await.expect("message");
        assert_eq!(event["data"]["message"], json!(format!("m{i}")));
    }

    let history: Value = reqwest::get(format!(
        "http://{}/api/consultations/C1/messages?limit=2",
        server.addr
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(history["has_more"], json!(true));
    assert_eq!(history["messages"][0]["message"], json!("m4"));
    assert_eq!(history["messages"][1]["message"], json!("m3"));
}
