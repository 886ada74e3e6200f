//! Typing indicator timing, driven on a paused clock.

mod common;

use chatflow::types::events::Event;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

fn typing_event(user_id: &str, username: &str, typing: bool) -> serde_json::Value {
    json!({
        "conversationId": "c1",
        "userId": user_id,
        "username": username,
        "typing": typing,
    })
}

#[tokio::test(start_paused = true)]
async fn test_local_typing_debounce() {
    let mut session =
        TestSession::start("me", "Me", Arc::new(TestMediaProvider::default())).await;

    session.client.chatstate().notify_input("c1").await.unwrap();
    let frame = session.conn.expect_sent("typing").await;
    assert_eq!(frame.data.as_ref().unwrap()["typing"], true);

    // Quiet for the whole debounce window: typing=false goes out.
    advance(Duration::from_millis(2100)).await;
    let frame = session.conn.expect_sent("typing").await;
    assert_eq!(frame.data.as_ref().unwrap()["typing"], false);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_continued_input_restarts_quiet_timer() {
    let mut session =
        TestSession::start("me", "Me", Arc::new(TestMediaProvider::default())).await;

    session.client.chatstate().notify_input("c1").await.unwrap();
    session.conn.expect_sent("typing").await;

    advance(Duration::from_millis(1000)).await;
    session.client.chatstate().notify_input("c1").await.unwrap();
    session.conn.expect_sent("typing").await;

    // Past the first deadline but within the restarted one: still typing.
    advance(Duration::from_millis(1200)).await;
    session.conn.assert_quiet().await;

    // Past the restarted deadline: exactly one typing=false.
    advance(Duration::from_millis(1000)).await;
    let frame = session.conn.expect_sent("typing").await;
    assert_eq!(frame.data.as_ref().unwrap()["typing"], false);
    session.conn.assert_quiet().await;

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_decays_without_refresh() {
    let mut session =
        TestSession::start("me", "Me", Arc::new(TestMediaProvider::default())).await;

    session
        .conn
        .inject_frame("typing", typing_event("u2", "ada", true))
        .await;
    settle().await;
    assert_eq!(
        session.client.typing().remote_typist("c1").as_deref(),
        Some("ada")
    );

    advance(Duration::from_millis(2600)).await;
    assert!(session.client.typing().remote_typist("c1").is_none());
    assert_eq!(
        session.events.count_where(|e| matches!(
            e,
            Event::RemoteTypingChanged { typist: None, .. }
        )),
        1
    );

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_refresh_extends_decay() {
    let mut session =
        TestSession::start("me", "Me", Arc::new(TestMediaProvider::default())).await;

    session
        .conn
        .inject_frame("typing", typing_event("u2", "ada", true))
        .await;
    advance(Duration::from_millis(1500)).await;
    session
        .conn
        .inject_frame("typing", typing_event("u2", "ada", true))
        .await;

    // Past the first deadline, within the refreshed one.
    advance(Duration::from_millis(1500)).await;
    assert_eq!(
        session.client.typing().remote_typist("c1").as_deref(),
        Some("ada")
    );

    advance(Duration::from_millis(1100)).await;
    assert!(session.client.typing().remote_typist("c1").is_none());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_false_clears_immediately() {
    let mut session =
        TestSession::start("me", "Me", Arc::new(TestMediaProvider::default())).await;

    session
        .conn
        .inject_frame("typing", typing_event("u2", "ada", true))
        .await;
    settle().await;
    session
        .conn
        .inject_frame("typing", typing_event("u2", "ada", false))
        .await;
    settle().await;
    assert!(session.client.typing().remote_typist("c1").is_none());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_own_typing_echo_is_ignored() {
    let mut session =
        TestSession::start("me", "Me", Arc::new(TestMediaProvider::default())).await;

    session
        .conn
        .inject_frame("typing", typing_event("me", "Me", true))
        .await;
    settle().await;
    assert!(session.client.typing().remote_typist("c1").is_none());
    assert_eq!(
        session
            .events
            .count_where(|e| matches!(e, Event::RemoteTypingChanged { .. })),
        0
    );

    session.shutdown().await;
}
