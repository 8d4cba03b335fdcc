//! CANCEL handling end to end: the CANCEL gets its own transaction and
//! an immediate 200, the unanswered INVITE gets 487, the TU is told,
//! and the ACK for the 487 confirms the INVITE server transaction.


use sipline_sip_core::prelude::*;
use sipline_sip_core::{ResponseBuilder, StatusCode};
use sipline_transaction_core::transaction::{TransactionEvent, TransactionState};

use transaction_test_utils::{build_ack, build_cancel, build_invite, expect_event, harness};

#[tokio::test]
async fn cancel_of_proceeding_invite_gets_200_and_487() {
    let mut h = harness();
    let invite = build_invite(&generate_branch());
    h.receive(Message::Request(invite.clone())).await;

    let event = expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::InviteRequest { .. })
    })
    .await;
    let TransactionEvent::InviteRequest { transaction_id, .. } = event else {
        unreachable!();
    };

    // TU answers 180; the INVITE transaction is now Proceeding.
    let ringing = ResponseBuilder::from_request(&invite, StatusCode::Ringing).build();
    h.manager
        .send_response(&transaction_id, ringing)
        .await
        .unwrap();
    expect_event(&mut h.events_rx, |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Proceeding,
                ..
            }
        )
    })
    .await;

    h.receive(Message::Request(build_cancel(&invite))).await;

    // 200 answers the CANCEL transaction itself.
    let ok = h
        .transport
        .wait_for_sent(|m| {
            m.as_response()
                .is_some_and(|r| r.status == StatusCode::Ok && r.cseq.method == Method::Cancel)
        })
        .await;
    assert_eq!(
        ok.as_response().unwrap().cseq.seq,
        invite.cseq.seq
    );

    // 487 answers the INVITE.
    let terminated = h
        .transport
        .wait_for_sent(|m| {
            m.as_response()
                .is_some_and(|r| r.status == StatusCode::RequestTerminated)
        })
        .await;
    assert_eq!(
        terminated.as_response().unwrap().cseq.method,
        Method::Invite
    );

    // And the TU heard about the CANCEL, pointed at the INVITE.
    let event = expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::CancelReceived { .. })
    })
    .await;
    let TransactionEvent::CancelReceived {
        transaction_id: cancelled,
        cancel_request,
    } = event
    else {
        unreachable!();
    };
    assert_eq!(cancelled, transaction_id);
    assert_eq!(cancel_request.method, Method::Cancel);

    expect_event(&mut h.events_rx, |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Completed,
                ..
            }
        )
    })
    .await;

    // ACK for the 487 confirms and winds the INVITE transaction down.
    h.receive(Message::Request(build_ack(&invite))).await;
    expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::AckReceived { .. })
    })
    .await;
    expect_event(&mut h.events_rx, |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Confirmed,
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn cancel_retransmission_replays_the_200() {
    let mut h = harness();
    let invite = build_invite(&generate_branch());
    h.receive(Message::Request(invite.clone())).await;
    expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::InviteRequest { .. })
    })
    .await;

    let cancel = build_cancel(&invite);
    h.receive(Message::Request(cancel.clone())).await;
    h.transport
        .wait_for_sent(|m| {
            m.as_response()
                .is_some_and(|r| r.status == StatusCode::Ok && r.cseq.method == Method::Cancel)
        })
        .await;

    // Retransmitted CANCEL routes to its own transaction and the 200
    // is replayed.
    h.receive(Message::Request(cancel)).await;
    h.transport
        .wait_for_sent(|m| {
            m.as_response()
                .is_some_and(|r| r.status == StatusCode::Ok && r.cseq.method == Method::Cancel)
        })
        .await;
}

#[tokio::test]
async fn stray_cancel_gets_481() {
    let mut h = harness();
    let unrelated = build_invite(&generate_branch());
    h.receive(Message::Request(build_cancel(&unrelated))).await;

    let response = h
        .transport
        .wait_for_sent(|m| m.as_response().is_some())
        .await;
    assert_eq!(
        response.as_response().unwrap().status,
        StatusCode::CallOrTransactionDoesNotExist
    );
    expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::StrayCancel { .. })
    })
    .await;
}

#[tokio::test]
async fn cancel_after_final_response_changes_nothing() {
    let mut h = harness();
    let invite = build_invite(&generate_branch());
    h.receive(Message::Request(invite.clone())).await;
    let event = expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::InviteRequest { .. })
    })
    .await;
    let TransactionEvent::InviteRequest { transaction_id, .. } = event else {
        unreachable!();
    };

    let busy = ResponseBuilder::from_request(&invite, StatusCode::BusyHere)
        .to_tag("b-tag")
        .build();
    h.manager
        .send_response(&transaction_id, busy)
        .await
        .unwrap();
    expect_event(&mut h.events_rx, |e| {
        matches!(
            e,
            TransactionEvent::StateChanged {
                new_state: TransactionState::Completed,
                ..
            }
        )
    })
    .await;

    h.receive(Message::Request(build_cancel(&invite))).await;

    // CANCEL is still answered 200 and reported, but no 487 follows.
    h.transport
        .wait_for_sent(|m| {
            m.as_response()
                .is_some_and(|r| r.status == StatusCode::Ok && r.cseq.method == Method::Cancel)
        })
        .await;
    expect_event(&mut h.events_rx, |e| {
        matches!(e, TransactionEvent::CancelReceived { .. })
    })
    .await;

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    while let Some((message, _)) = h.transport.next_sent().await {
        if let Some(response) = message.as_response() {
            assert_ne!(response.status, StatusCode::RequestTerminated);
        }
    }
}
