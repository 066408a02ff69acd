//! End-to-end tests against a real server bound to an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pointing_core::{MeetingId, ServerEvent, Snapshot};
use pointing_server::{PointingServer, RoomPolicy, ServerConfig};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_with(config: ServerConfig, policy: RoomPolicy) -> (PointingServer, SocketAddr) {
    let server = PointingServer::new(config, policy);
    let (addr, _handle) = server.listen().await.unwrap();
    (server, addr)
}

async fn start() -> (PointingServer, SocketAddr) {
    start_with(ServerConfig::default(), RoomPolicy::default()).await
}

async fn connect(addr: SocketAddr, meeting: &str, user: &str) -> Client {
    let url = format!("ws://{addr}/ws?meetingId={meeting}&userId={user}");
    let (ws, _resp) = connect_async(url).await.unwrap();
    ws
}

async fn recv(ws: &mut Client) -> ServerEvent {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv_state(ws: &mut Client) -> Snapshot {
    match recv(ws).await {
        ServerEvent::StateUpdate(snapshot) => snapshot,
        other => panic!("expected stateUpdate, got {other:?}"),
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Read until the server closes the socket.
async fn expect_closed(ws: &mut Client) {
    loop {
        match timeout(WAIT, ws.next()).await.expect("socket not closed") {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn create_ticket(id: &str, title: &str) -> Value {
    json!({"type": "createTicket", "data": {"id": id, "title": title, "description": ""}})
}

fn vote(points: i64) -> Value {
    json!({"type": "submitVote", "data": {"points": points}})
}

fn roster_ids(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.roster.iter().map(|p| p.user_id.as_str()).collect()
}

#[tokio::test]
async fn estimation_round_end_to_end() {
    let (_server, addr) = start().await;

    let mut h = connect(addr, "M1", "h").await;
    let snap = recv_state(&mut h).await;
    assert!(snap.ticket.is_none());
    assert_eq!(roster_ids(&snap), vec!["h"]);

    send(&mut h, create_ticket("t1", "Login bug")).await;
    let snap = recv_state(&mut h).await;
    assert_eq!(snap.ticket.as_ref().unwrap().id, "t1");
    assert!(snap.votes.is_empty());

    let mut p1 = connect(addr, "M1", "p1").await;
    let snap = recv_state(&mut p1).await;
    assert_eq!(snap.ticket.as_ref().unwrap().title, "Login bug");
    assert_eq!(roster_ids(&recv_state(&mut h).await), vec!["h", "p1"]);

    send(&mut p1, vote(5)).await;
    assert_eq!(recv_state(&mut h).await.votes.len(), 1);
    assert_eq!(recv_state(&mut p1).await.votes.len(), 1);

    let mut p2 = connect(addr, "M1", "p2").await;
    let _ = recv_state(&mut p2).await;
    let _ = recv_state(&mut h).await;
    let _ = recv_state(&mut p1).await;

    send(&mut p2, vote(5)).await;
    let snap = recv_state(&mut h).await;
    assert_eq!(snap.votes.len(), 2);
    assert!(snap.votes.iter().all(|v| v.points == serde_json::Number::from(5)));
    let _ = recv_state(&mut p1).await;
    let _ = recv_state(&mut p2).await;

    send(&mut h, json!({"type": "endTicket"})).await;
    for client in [&mut h, &mut p1, &mut p2] {
        assert_eq!(recv(client).await, ServerEvent::TicketEnded);
        let snap = recv_state(client).await;
        assert!(snap.ticket.is_none());
        assert!(snap.votes.is_empty());
        assert_eq!(roster_ids(&snap), vec!["h", "p1", "p2"]);
    }
}

#[tokio::test]
async fn missing_identity_is_refused() {
    let (server, addr) = start().await;

    let url = format!("ws://{addr}/ws?meetingId=M1");
    match connect_async(url).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 400),
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }

    let url = format!("ws://{addr}/ws?meetingId=%20&userId=u1");
    match connect_async(url).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 400),
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }

    assert_eq!(server.registry().meeting_count(), 0);
}

#[tokio::test]
async fn disallowed_origin_is_refused() {
    let config = ServerConfig {
        allowed_origins: vec!["http://localhost:3000".into()],
        ..ServerConfig::default()
    };
    let (server, addr) = start_with(config, RoomPolicy::default()).await;

    let mut req = format!("ws://{addr}/ws?meetingId=M1&userId=u1")
        .into_client_request()
        .unwrap();
    let _ = req
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());
    match connect_async(req).await {
        Err(WsError::Http(resp)) => assert_eq!(resp.status(), 403),
        other => panic!("expected HTTP 403, got {:?}", other.map(|_| ())),
    }

    let mut req = format!("ws://{addr}/ws?meetingId=M1&userId=u1")
        .into_client_request()
        .unwrap();
    let _ = req
        .headers_mut()
        .insert("Origin", "http://localhost:3000".parse().unwrap());
    let (mut ws, _resp) = connect_async(req).await.unwrap();
    assert_eq!(roster_ids(&recv_state(&mut ws).await), vec!["u1"]);
    assert_eq!(server.registry().meeting_count(), 1);
}

#[tokio::test]
async fn leaving_shrinks_roster_and_last_leave_removes_meeting() {
    let (server, addr) = start().await;
    let meeting = MeetingId::from("M2");

    let mut a = connect(addr, "M2", "a").await;
    let _ = recv_state(&mut a).await;
    let mut b = connect(addr, "M2", "b").await;
    let _ = recv_state(&mut b).await;
    let _ = recv_state(&mut a).await;
    let mut c = connect(addr, "M2", "c").await;
    let _ = recv_state(&mut c).await;
    let _ = recv_state(&mut a).await;
    let _ = recv_state(&mut b).await;

    c.close(None).await.unwrap();
    assert_eq!(roster_ids(&recv_state(&mut a).await), vec!["a", "b"]);
    assert_eq!(roster_ids(&recv_state(&mut b).await), vec!["a", "b"]);

    b.close(None).await.unwrap();
    assert_eq!(roster_ids(&recv_state(&mut a).await), vec!["a"]);
    assert!(server.registry().contains(&meeting));

    a.close(None).await.unwrap();
    let registry = server.registry().clone();
    wait_until(|| !registry.contains(&meeting)).await;
    assert_eq!(registry.meeting_count(), 0);
}

#[tokio::test]
async fn votes_survive_voter_disconnect() {
    let (_server, addr) = start().await;

    let mut h = connect(addr, "M3", "h").await;
    let _ = recv_state(&mut h).await;
    send(&mut h, create_ticket("t1", "Search")).await;
    let _ = recv_state(&mut h).await;

    let mut p = connect(addr, "M3", "p").await;
    let _ = recv_state(&mut p).await;
    let _ = recv_state(&mut h).await;
    send(&mut p, vote(8)).await;
    let _ = recv_state(&mut h).await;

    p.close(None).await.unwrap();
    let snap = recv_state(&mut h).await;
    assert_eq!(roster_ids(&snap), vec!["h"]);
    assert_eq!(snap.votes.len(), 1);
    assert_eq!(snap.votes[0].user_id.as_str(), "p");
}

#[tokio::test]
async fn end_meeting_disconnects_everyone_and_rejoin_is_fresh() {
    let (server, addr) = start().await;
    let meeting = MeetingId::from("M4");

    let mut h = connect(addr, "M4", "h").await;
    let _ = recv_state(&mut h).await;
    let mut p = connect(addr, "M4", "p").await;
    let _ = recv_state(&mut p).await;
    let _ = recv_state(&mut h).await;

    send(&mut h, create_ticket("t1", "Checkout")).await;
    let _ = recv_state(&mut h).await;
    let _ = recv_state(&mut p).await;
    send(&mut p, vote(3)).await;
    let _ = recv_state(&mut h).await;
    let _ = recv_state(&mut p).await;

    send(&mut h, json!({"type": "endMeeting"})).await;
    assert_eq!(recv(&mut h).await, ServerEvent::MeetingEnded);
    assert_eq!(recv(&mut p).await, ServerEvent::MeetingEnded);
    expect_closed(&mut h).await;
    expect_closed(&mut p).await;
    assert!(!server.registry().contains(&meeting));

    let mut again = connect(addr, "M4", "h").await;
    let snap = recv_state(&mut again).await;
    assert!(snap.ticket.is_none());
    assert!(snap.votes.is_empty());
    assert_eq!(roster_ids(&snap), vec!["h"]);
}

#[tokio::test]
async fn concurrent_votes_are_all_recorded() {
    let (_server, addr) = start().await;

    let mut h = connect(addr, "M5", "h").await;
    let _ = recv_state(&mut h).await;
    send(&mut h, create_ticket("t1", "Payments")).await;
    let _ = recv_state(&mut h).await;

    let mut voters = Vec::new();
    for i in 0..10 {
        let mut ws = connect(addr, "M5", &format!("v{i}")).await;
        let _ = recv_state(&mut ws).await;
        voters.push(ws);
    }

    let tasks: Vec<_> = voters
        .into_iter()
        .enumerate()
        .map(|(i, mut ws)| {
            tokio::spawn(async move {
                send(&mut ws, vote(i64::try_from(i).unwrap())).await;
                ws
            })
        })
        .collect();
    let mut voters = Vec::new();
    for task in tasks {
        voters.push(task.await.unwrap());
    }

    let snap = timeout(WAIT, async {
        loop {
            let snap = recv_state(&mut h).await;
            if snap.votes.len() == 10 {
                return snap;
            }
        }
    })
    .await
    .expect("not every vote arrived");
    let mut voted: Vec<&str> = snap.votes.iter().map(|v| v.user_id.as_str()).collect();
    voted.sort_unstable();
    let mut expected: Vec<String> = (0..10).map(|i| format!("v{i}")).collect();
    expected.sort_unstable();
    assert_eq!(voted, expected);
    drop(voters);
}

#[tokio::test]
async fn vote_without_ticket_ignored_by_default() {
    let (server, addr) = start().await;

    let mut a = connect(addr, "M6", "a").await;
    let _ = recv_state(&mut a).await;
    send(&mut a, vote(5)).await;
    // A later event from the same connection is processed after the vote
    send(&mut a, json!({"type": "updateParticipant", "data": {"displayName": "Alice"}})).await;
    let snap = recv_state(&mut a).await;
    assert_eq!(snap.roster[0].display_name, "Alice");
    assert!(snap.votes.is_empty());

    let room = server.registry().get(&MeetingId::from("M6")).unwrap();
    assert!(room.snapshot().await.unwrap().votes.is_empty());
}

#[tokio::test]
async fn vote_without_ticket_accepted_when_enabled() {
    let policy = RoomPolicy {
        allow_votes_without_ticket: true,
        ..RoomPolicy::default()
    };
    let (_server, addr) = start_with(ServerConfig::default(), policy).await;

    let mut a = connect(addr, "M7", "a").await;
    let _ = recv_state(&mut a).await;
    send(&mut a, vote(5)).await;
    let snap = recv_state(&mut a).await;
    assert!(snap.ticket.is_none());
    assert_eq!(snap.votes.len(), 1);
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let (_server, addr) = start().await;

    let mut a = connect(addr, "M8", "a").await;
    let _ = recv_state(&mut a).await;
    a.send(Message::text("not json")).await.unwrap();
    send(&mut a, json!({"type": "launchRockets"})).await;
    send(&mut a, create_ticket("t1", "Still here")).await;

    let snap = recv_state(&mut a).await;
    assert_eq!(snap.ticket.unwrap().id, "t1");
}

#[tokio::test]
async fn meetings_are_isolated() {
    let (_server, addr) = start().await;

    let mut a = connect(addr, "M9", "a").await;
    let _ = recv_state(&mut a).await;
    let mut b = connect(addr, "M10", "b").await;
    let _ = recv_state(&mut b).await;

    send(&mut a, create_ticket("t1", "Only in M9")).await;
    assert!(recv_state(&mut a).await.ticket.is_some());

    send(&mut b, json!({"type": "updateParticipant", "data": {"displayName": "Bee"}})).await;
    let snap = recv_state(&mut b).await;
    assert!(snap.ticket.is_none());
    assert_eq!(roster_ids(&snap), vec!["b"]);
}

#[tokio::test]
async fn health_reports_connections_and_meetings() {
    let (_server, addr) = start().await;

    let mut a = connect(addr, "M11", "a").await;
    let _ = recv_state(&mut a).await;

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    assert_eq!(body["active_meetings"], 1);
    assert!(body["started_at"].is_string());
}

#[tokio::test]
async fn shutdown_closes_connections() {
    let (server, addr) = start().await;

    let mut a = connect(addr, "M12", "a").await;
    let _ = recv_state(&mut a).await;

    server.shutdown().shutdown();
    expect_closed(&mut a).await;
    let registry = server.registry().clone();
    wait_until(|| registry.meeting_count() == 0).await;
}

#[tokio::test]
async fn silent_client_is_dropped_after_heartbeat_timeout() {
    let config = ServerConfig {
        heartbeat_interval_ms: 100,
        heartbeat_timeout_ms: 300,
        ..ServerConfig::default()
    };
    let (server, addr) = start_with(config, RoomPolicy::default()).await;

    let mut a = connect(addr, "M13", "a").await;
    let _ = recv_state(&mut a).await;

    // Completes the upgrade, then never reads, pongs or sends again.
    let silent = connect(addr, "M13", "silent").await;
    assert_eq!(roster_ids(&recv_state(&mut a).await), vec!["a", "silent"]);
    assert_eq!(server.connection_count(), 2);

    assert_eq!(roster_ids(&recv_state(&mut a).await), vec!["a"]);
    wait_until(|| server.connection_count() == 1).await;
    assert!(server.registry().contains(&MeetingId::from("M13")));

    // A client that keeps reading answers pings and outlives several
    // timeout windows.
    let idle = timeout(Duration::from_millis(700), async {
        while let Some(Ok(msg)) = a.next().await {
            assert!(
                matches!(msg, Message::Ping(_) | Message::Pong(_)),
                "unexpected frame: {msg:?}"
            );
        }
    })
    .await;
    assert!(idle.is_err(), "responsive client was disconnected");
    send(&mut a, create_ticket("T1", "Still here")).await;
    let snap = recv_state(&mut a).await;
    assert_eq!(snap.ticket.as_ref().unwrap().id, "T1");
    assert_eq!(roster_ids(&snap), vec!["a"]);
    drop(silent);
}

#[tokio::test]
async fn graceful_shutdown_drains_sessions() {
    let server = PointingServer::new(ServerConfig::default(), RoomPolicy::default());
    let (addr, listener) = server.listen().await.unwrap();

    let mut a = connect(addr, "M14", "a").await;
    let _ = recv_state(&mut a).await;
    let mut b = connect(addr, "M15", "b").await;
    let _ = recv_state(&mut b).await;
    assert_eq!(server.shutdown().active_sessions(), 2);

    assert!(
        server
            .shutdown()
            .graceful_shutdown(listener, Some(WAIT))
            .await
    );

    // Every session has left its meeting by the time shutdown returns.
    assert_eq!(server.registry().meeting_count(), 0);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.shutdown().active_sessions(), 0);
    expect_closed(&mut a).await;
    expect_closed(&mut b).await;
}
