//! Call signaling end to end: two real client instances exchanging frames
//! through a hand-relayed "room", echoes included, the way the server fans
//! signaling out to every participant.

mod common;

use chatflow::calls::CallPhase;
use chatflow::types::events::Event;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_call_handshake_reaches_active_on_both_sides() {
    let mut caller =
        TestSession::start("u1", "Caller", Arc::new(TestMediaProvider::default())).await;
    let mut callee =
        TestSession::start("u2", "Callee", Arc::new(TestMediaProvider::default())).await;

    caller.client.calls().start("c1", true).await.unwrap();
    let initiate = caller.conn.expect_sent("initiate_call").await;
    assert_eq!(initiate.data.unwrap()["conversationId"], "c1");
    let offer = caller.conn.expect_sent("webrtc_offer").await;
    let offer_data = offer.data.unwrap();
    assert_eq!(offer_data["senderId"], "u1");
    assert_eq!(caller.client.calls().phase().await, CallPhase::Negotiating);

    // Server notifies the callee, then fans the offer out to the room,
    // including back at the caller, who must ignore its own echo.
    callee
        .conn
        .inject_frame(
            "incoming_call",
            json!({ "conversationId": "c1", "callerId": "u1", "callerName": "Caller" }),
        )
        .await;
    settle().await;
    assert_eq!(callee.client.calls().phase().await, CallPhase::Ringing);
    assert_eq!(
        callee
            .events
            .count_where(|e| matches!(e, Event::IncomingCall { .. })),
        1
    );

    caller
        .conn
        .inject_frame("webrtc_offer", offer_data.clone())
        .await;
    callee.conn.inject_frame("webrtc_offer", offer_data).await;
    settle().await;
    assert_eq!(caller.client.calls().phase().await, CallPhase::Negotiating);

    callee.client.calls().accept().await.unwrap();
    let answer = callee.conn.expect_sent("webrtc_answer").await;
    let answer_data = answer.data.unwrap();
    assert_eq!(answer_data["senderId"], "u2");
    assert_eq!(callee.client.calls().phase().await, CallPhase::Negotiating);

    callee
        .conn
        .inject_frame("webrtc_answer", answer_data.clone())
        .await;
    caller.conn.inject_frame("webrtc_answer", answer_data).await;
    settle().await;
    assert_eq!(caller.client.calls().phase().await, CallPhase::Active);

    // The caller's candidate reaching the callee completes its side.
    callee
        .conn
        .inject_frame(
            "webrtc_ice_candidate",
            json!({
                "conversationId": "c1",
                "candidate": { "candidate": "candidate:1" },
                "senderId": "u1",
            }),
        )
        .await;
    settle().await;
    assert_eq!(callee.client.calls().phase().await, CallPhase::Active);

    // Hang-up propagates and both sides return to idle.
    caller.client.calls().hang_up().await.unwrap();
    let end = caller.conn.expect_sent("end_call").await;
    callee.conn.inject_frame("end_call", end.data.unwrap()).await;
    settle().await;
    assert_eq!(caller.client.calls().phase().await, CallPhase::Idle);
    assert_eq!(callee.client.calls().phase().await, CallPhase::Idle);
    assert_eq!(
        callee
            .events
            .count_where(|e| matches!(e, Event::CallEnded { .. })),
        1
    );

    caller.shutdown().await;
    callee.shutdown().await;
}

#[tokio::test]
async fn test_decline_from_ringing_allocates_no_media() {
    let media = Arc::new(TestMediaProvider::default());
    let mut callee = TestSession::start("u2", "Callee", media.clone()).await;

    callee
        .conn
        .inject_frame(
            "incoming_call",
            json!({ "conversationId": "c1", "callerId": "u1", "callerName": "Caller" }),
        )
        .await;
    callee
        .conn
        .inject_frame(
            "webrtc_offer",
            json!({
                "conversationId": "c1",
                "sdp": "sdp-offer",
                "type": "offer",
                "senderId": "u1",
            }),
        )
        .await;
    settle().await;
    assert_eq!(callee.client.calls().phase().await, CallPhase::Ringing);

    callee.client.calls().decline().await.unwrap();
    let rejected = callee.conn.expect_sent("call_rejected").await;
    let data = rejected.data.unwrap();
    assert_eq!(data["conversationId"], "c1");
    assert_eq!(data["senderId"], "u2");

    assert_eq!(callee.client.calls().phase().await, CallPhase::Idle);
    assert_eq!(media.acquisitions.load(Ordering::SeqCst), 0);
    assert_eq!(
        callee.events.count_where(|e| matches!(
            e,
            Event::CallEnded {
                reason: chatflow::calls::CallEndReason::Declined,
                ..
            }
        )),
        1
    );

    callee.shutdown().await;
}

#[tokio::test]
async fn test_accept_media_failure_notifies_remote_and_idles() {
    let media = Arc::new(TestMediaProvider::default());
    media.fail_media.store(true, Ordering::SeqCst);
    let mut callee = TestSession::start("u2", "Callee", media).await;

    callee
        .conn
        .inject_frame(
            "webrtc_offer",
            json!({
                "conversationId": "c1",
                "sdp": "sdp-offer",
                "type": "offer",
                "senderId": "u1",
            }),
        )
        .await;
    settle().await;
    assert_eq!(callee.client.calls().phase().await, CallPhase::Ringing);

    let err = callee.client.calls().accept().await.unwrap_err();
    assert!(matches!(err, chatflow::calls::CallError::Media(_)));

    // The caller must not ring forever: the aborting side says so.
    let end = callee.conn.expect_sent("end_call").await;
    assert_eq!(end.data.unwrap()["conversationId"], "c1");
    assert_eq!(callee.client.calls().phase().await, CallPhase::Idle);
    assert_eq!(
        callee.events.count_where(|e| matches!(
            e,
            Event::CallEnded {
                reason: chatflow::calls::CallEndReason::Failed,
                ..
            }
        )),
        1
    );

    callee.shutdown().await;
}

#[tokio::test]
async fn test_remote_decline_ends_callers_attempt() {
    let mut caller =
        TestSession::start("u1", "Caller", Arc::new(TestMediaProvider::default())).await;

    caller.client.calls().start("c1", false).await.unwrap();
    caller.conn.expect_sent("initiate_call").await;
    caller.conn.expect_sent("webrtc_offer").await;

    caller
        .conn
        .inject_frame(
            "call_rejected",
            json!({ "conversationId": "c1", "senderId": "u2" }),
        )
        .await;
    settle().await;
    assert_eq!(caller.client.calls().phase().await, CallPhase::Idle);
    assert_eq!(
        caller.events.count_where(|e| matches!(
            e,
            Event::CallEnded {
                reason: chatflow::calls::CallEndReason::Declined,
                ..
            }
        )),
        1
    );

    caller.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_tears_down_active_call() {
    let mut caller =
        TestSession::start("u1", "Caller", Arc::new(TestMediaProvider::default())).await;

    caller.client.calls().start("c1", false).await.unwrap();
    caller.conn.expect_sent("initiate_call").await;
    caller.conn.expect_sent("webrtc_offer").await;

    caller.conn.drop_connection().await;
    wait_until(|| !caller.client.is_connected()).await;
    assert_eq!(caller.client.calls().phase().await, CallPhase::Idle);
    assert_eq!(
        caller.events.count_where(|e| matches!(
            e,
            Event::CallEnded {
                reason: chatflow::calls::CallEndReason::ConnectionLost,
                ..
            }
        )),
        1
    );

    caller.shutdown().await;
}
