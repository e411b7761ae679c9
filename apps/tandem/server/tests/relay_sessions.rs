use std::{net::SocketAddr, time::Duration};

use futures_util::SinkExt;
use tandem_client::{
    ClientEnvelope, ClientEvent, ClientState, PlaybackSync, PlayerError, RelayClient,
    ServerEnvelope, VideoPlayer,
};
use tandem_relay::{AppState, Relay};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

async fn spawn_relay() -> (SocketAddr, Relay) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let relay = Relay::default();
    let state = AppState::new(relay.clone(), None);
    tokio::spawn(tandem_relay::serve(listener, state, std::future::pending()));
    (addr, relay)
}

async fn connect(addr: SocketAddr) -> RelayClient {
    RelayClient::connect(&format!("ws://{addr}/ws"))
        .await
        .expect("connect to relay")
}

async fn expect(client: &mut RelayClient) -> ServerEnvelope {
    client.recv_timeout(WAIT).await.expect("envelope from relay")
}

async fn expect_silence(client: &mut RelayClient) {
    if let Some(envelope) = client.recv_timeout(QUIET).await {
        panic!("unexpected envelope {envelope:?}");
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn create(session_id: &str, user_id: &str) -> ClientEnvelope {
    ClientEnvelope::CreateSession {
        session_id: session_id.into(),
        user_id: user_id.into(),
    }
}

fn join(session_id: &str, user_id: &str) -> ClientEnvelope {
    ClientEnvelope::JoinSession {
        session_id: session_id.into(),
        user_id: user_id.into(),
    }
}

fn send(session_id: &str, user_id: &str, message: &str) -> ClientEnvelope {
    ClientEnvelope::SendMessage {
        session_id: session_id.into(),
        user_id: user_id.into(),
        message: message.into(),
    }
}

#[test_timeout::tokio_timeout_test]
async fn two_users_share_a_session() {
    let (addr, relay) = spawn_relay().await;
    let mut user1 = connect(addr).await;
    let mut user2 = connect(addr).await;

    user1.send(create("s1", "user1")).unwrap();
    assert_eq!(
        expect(&mut user1).await,
        ServerEnvelope::CreatedSessionSuccessfully {
            session_id: "s1".into()
        }
    );
    assert_eq!(expect(&mut user1).await, ServerEnvelope::UserCount { count: 1 });

    user2.send(join("s1", "user2")).unwrap();
    assert_eq!(
        expect(&mut user2).await,
        ServerEnvelope::JoinedSessionSuccessfully {
            session_id: "s1".into()
        }
    );
    assert_eq!(expect(&mut user2).await, ServerEnvelope::UserCount { count: 2 });
    assert_eq!(expect(&mut user1).await, ServerEnvelope::UserCount { count: 2 });

    user1.send(send("s1", "user1", "PLAY")).unwrap();
    assert_eq!(
        expect(&mut user2).await,
        ServerEnvelope::ServerMessage {
            message: "PLAY".into()
        }
    );
    expect_silence(&mut user1).await;

    user1.close().await;
    assert_eq!(expect(&mut user2).await, ServerEnvelope::UserCount { count: 1 });
    assert!(relay.session_exists("s1"));

    user2.close().await;
    eventually(|| !relay.session_exists("s1")).await;
}

#[test_timeout::tokio_timeout_test]
async fn failures_are_reported_to_the_requester_only() {
    let (addr, _relay) = spawn_relay().await;
    let mut owner = connect(addr).await;
    let mut other = connect(addr).await;

    owner.send(create("s1", "owner")).unwrap();
    expect(&mut owner).await;
    expect(&mut owner).await;

    other.send(create("s1", "other")).unwrap();
    assert_eq!(expect(&mut other).await, ServerEnvelope::CreateSessionFailure);

    other.send(join("missing", "other")).unwrap();
    assert_eq!(expect(&mut other).await, ServerEnvelope::JoinSessionFailure);

    other.send(send("missing", "other", "PAUSE")).unwrap();
    expect_silence(&mut other).await;
    expect_silence(&mut owner).await;
}

#[test_timeout::tokio_timeout_test]
async fn emptied_session_id_can_be_reused() {
    let (addr, relay) = spawn_relay().await;
    let mut first = connect(addr).await;
    first.send(create("s1", "a")).unwrap();
    expect(&mut first).await;
    first.close().await;
    eventually(|| !relay.session_exists("s1")).await;

    let mut second = connect(addr).await;
    second.send(create("s1", "b")).unwrap();
    assert_eq!(
        expect(&mut second).await,
        ServerEnvelope::CreatedSessionSuccessfully {
            session_id: "s1".into()
        }
    );
}

#[test_timeout::tokio_timeout_test]
async fn malformed_frames_do_not_close_the_connection() {
    let (addr, relay) = spawn_relay().await;
    let (mut raw, _) = connect_async(format!("ws://{addr}/api"))
        .await
        .expect("connect raw socket");

    for frame in [
        "not json",
        r#"{"type":"CREATE_SESSION"}"#,
        r#"{"type":"SOMETHING_ELSE","sessionId":"s1"}"#,
    ] {
        raw.send(Message::Text(frame.to_string().into())).await.unwrap();
    }
    let valid = r#"{"type":"CREATE_SESSION","sessionId":"s1","userId":"raw"}"#;
    raw.send(Message::Text(valid.to_string().into()))
        .await
        .unwrap();

    eventually(|| relay.session_exists("s1")).await;
    assert_eq!(relay.stats().sessions[0].members, 1);
}

#[derive(Default)]
struct RecordingPlayer {
    calls: Vec<String>,
    time: f64,
}

impl VideoPlayer for RecordingPlayer {
    fn play(&mut self) -> Result<(), PlayerError> {
        self.calls.push("play".into());
        Ok(())
    }

    fn pause(&mut self) {
        self.calls.push("pause".into());
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.time = seconds;
    }

    fn current_time(&self) -> f64 {
        self.time
    }
}

#[test_timeout::tokio_timeout_test]
async fn applied_remote_play_is_not_echoed_back() {
    let (addr, _relay) = spawn_relay().await;
    let mut leader = connect(addr).await;
    let mut follower = connect(addr).await;

    leader.send(create("s1", "leader")).unwrap();
    expect(&mut leader).await;
    expect(&mut leader).await;

    let mut sync = PlaybackSync::new(
        ClientState::new("follower"),
        RecordingPlayer::default(),
        follower.sender(),
    );
    sync.handle(ClientEvent::ConnectedToServer);
    sync.join_session("s1").unwrap();
    for _ in 0..2 {
        sync.handle(expect(&mut follower).await.into());
    }
    assert!(sync.state().connected_to_session);
    assert_eq!(sync.state().user_count, 2);
    assert_eq!(expect(&mut leader).await, ServerEnvelope::UserCount { count: 2 });

    leader.send(send("s1", "leader", "PLAY")).unwrap();
    sync.handle(expect(&mut follower).await.into());
    assert_eq!(sync.player().calls, ["play"]);

    // The player reports the play it just performed.
    assert!(!sync.on_local_play().unwrap());
    expect_silence(&mut leader).await;

    // A real pause from the follower reaches the leader.
    assert!(sync.on_local_pause().unwrap());
    assert_eq!(
        expect(&mut leader).await,
        ServerEnvelope::ServerMessage {
            message: "PAUSE".into()
        }
    );
}

#[test_timeout::tokio_timeout_test]
async fn health_endpoint_answers() {
    let (addr, _relay) = spawn_relay().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#"{"status":"ok"}"#));
}
