//! Client connection state machine driven against a live coordinator through
//! an in-process transport.

mod common;

use common::{coordinator, insert_step, LocalTransport};
use coscribe::client::connection::{CollabSession, CommState};
use coscribe::shared::transform::ReplaceTransform;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn session_for(
    coordinator: &Arc<coscribe::backend::sync::SyncCoordinator>,
    document_id: &str,
) -> (CollabSession, coscribe::client::connection::EditorHandle) {
    CollabSession::new(
        Arc::new(LocalTransport::new(coordinator.clone())),
        Arc::new(ReplaceTransform),
        document_id,
    )
}

#[tokio::test]
async fn edit_flows_from_one_client_to_another() {
    let coordinator = coordinator();
    let (mut alice, _alice_handle) = session_for(&coordinator, "doc-1");
    let (mut bob, _bob_handle) = session_for(&coordinator, "doc-1");

    alice.step().await; // start -> poll
    bob.step().await;

    alice.queue_local_edit(insert_step());
    assert_eq!(alice.state(), CommState::Send);
    alice.step().await; // send -> accepted
    assert_eq!(alice.local_version(), 1);
    assert_eq!(alice.state(), CommState::Poll);

    bob.step().await; // poll integrates alice's step
    assert_eq!(bob.local_version(), 1);
    assert_eq!(bob.content(), alice.content());
}

#[tokio::test]
async fn conflicting_edits_converge_after_rebase() {
    let coordinator = coordinator();
    let (mut alice, _alice_handle) = session_for(&coordinator, "doc-1");
    let (mut bob, _bob_handle) = session_for(&coordinator, "doc-1");
    alice.step().await;
    bob.step().await;

    // Both queue an edit against version 0.
    alice.queue_local_edit(insert_step());
    bob.queue_local_edit(insert_step());

    alice.step().await; // alice wins the race
    assert_eq!(alice.local_version(), 1);

    bob.step().await; // bob's send conflicts -> back to poll
    assert_eq!(bob.state(), CommState::Poll);
    assert_eq!(bob.pending_count(), 1);

    bob.step().await; // poll integrates alice's step, rebases, queues resend
    assert_eq!(bob.local_version(), 1);
    assert_eq!(bob.state(), CommState::Send);

    bob.step().await; // resubmit at the rebased version
    assert_eq!(bob.local_version(), 2);
    assert_eq!(bob.pending_count(), 0);

    alice.step().await; // alice pulls bob's step
    assert_eq!(alice.local_version(), 2);
    assert_eq!(alice.content(), bob.content());
    assert_eq!(
        alice.content()["content"].as_array().unwrap().len(),
        2,
        "both inserts survive the conflict"
    );
}

#[tokio::test]
async fn edit_submitted_through_handle_interrupts_a_parked_poll() {
    let coordinator = coordinator();
    let (mut session, handle) = session_for(&coordinator, "doc-1");
    session.step().await; // start -> poll

    // The poll parks (nothing to deliver); the edit arrives mid-wait and
    // takes priority over the pull.
    let submit = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.submit(insert_step()).unwrap();
    };
    tokio::join!(session.step(), submit);

    assert_eq!(session.state(), CommState::Send);
    assert_eq!(session.pending_count(), 1);

    session.step().await;
    assert_eq!(session.local_version(), 1);
}

#[tokio::test]
async fn presence_follows_the_session_lifecycle() {
    let coordinator = coordinator();
    let (mut session, _handle) = session_for(&coordinator, "doc-1");

    session.step().await; // start registers presence
    let state = coordinator.document_state("doc-1").await.unwrap();
    assert_eq!(state.connected_clients, 1);

    session.close().await.unwrap();
    let state = coordinator.document_state("doc-1").await.unwrap();
    assert_eq!(state.connected_clients, 0);
}

#[tokio::test]
async fn late_joiner_catches_up_from_version_zero() {
    let coordinator = coordinator();
    let (mut alice, _alice_handle) = session_for(&coordinator, "doc-1");
    alice.step().await;
    for _ in 0..3 {
        alice.queue_local_edit(insert_step());
        alice.step().await;
    }
    assert_eq!(alice.local_version(), 3);

    let (mut carol, _carol_handle) = session_for(&coordinator, "doc-1");
    carol.step().await; // start
    carol.step().await; // poll pulls the full history
    assert_eq!(carol.local_version(), 3);
    assert_eq!(carol.content(), alice.content());
}
