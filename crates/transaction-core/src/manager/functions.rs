//! Read-only accessor surface over the transaction tables, for TUs that
//! hold only a [`TransactionKey`].

use std::net::SocketAddr;

use sipline_sip_core::{Request, Response};

use crate::error::{Error, Result};
use crate::manager::TransactionManager;
use crate::transaction::{TransactionKey, TransactionKind, TransactionState};

impl TransactionManager {
    pub fn transaction_exists(&self, key: &TransactionKey) -> bool {
        self.client_transactions.contains_key(key) || self.server_transactions.contains_key(key)
    }

    pub fn transaction_state(&self, key: &TransactionKey) -> Result<TransactionState> {
        if let Some(tx) = self.client_transactions.get(key) {
            return Ok(tx.value().state());
        }
        if let Some(tx) = self.server_transactions.get(key) {
            return Ok(tx.value().state());
        }
        Err(Error::TransactionNotFound(key.clone()))
    }

    pub fn transaction_kind(&self, key: &TransactionKey) -> Result<TransactionKind> {
        if let Some(tx) = self.client_transactions.get(key) {
            return Ok(tx.value().kind());
        }
        if let Some(tx) = self.server_transactions.get(key) {
            return Ok(tx.value().kind());
        }
        Err(Error::TransactionNotFound(key.clone()))
    }

    pub fn remote_addr(&self, key: &TransactionKey) -> Result<SocketAddr> {
        if let Some(tx) = self.client_transactions.get(key) {
            return Ok(tx.value().remote_addr());
        }
        if let Some(tx) = self.server_transactions.get(key) {
            return Ok(tx.value().remote_addr());
        }
        Err(Error::TransactionNotFound(key.clone()))
    }

    pub async fn original_request(&self, key: &TransactionKey) -> Result<Request> {
        if let Some(tx) = self.client_transactions.get(key).map(|e| e.value().clone()) {
            return Ok(tx.original_request().await);
        }
        if let Some(tx) = self.server_transactions.get(key).map(|e| e.value().clone()) {
            return Ok(tx.original_request().await);
        }
        Err(Error::TransactionNotFound(key.clone()))
    }

    pub async fn last_response(&self, key: &TransactionKey) -> Result<Option<Response>> {
        if let Some(tx) = self.client_transactions.get(key).map(|e| e.value().clone()) {
            return Ok(tx.last_response().await);
        }
        if let Some(tx) = self.server_transactions.get(key).map(|e| e.value().clone()) {
            return Ok(tx.last_response().await);
        }
        Err(Error::TransactionNotFound(key.clone()))
    }

    /// Keys of every transaction currently in the tables, terminated
    /// but lingering entries included.
    pub fn active_transactions(&self) -> (Vec<TransactionKey>, Vec<TransactionKey>) {
        (
            self.client_transactions
                .iter()
                .map(|e| e.key().clone())
                .collect(),
            self.server_transactions
                .iter()
                .map(|e| e.key().clone())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use sipline_sip_core::prelude::*;
    use sipline_sip_core::{RequestBuilder, ResponseBuilder, StatusCode};

    use crate::manager::TransactionManager;
    use crate::test_utils::{fast_timers, MockTransport};
    use crate::transaction::{TransactionEvent, TransactionState};
    use crate::transport::TransportEvent;

    struct Harness {
        manager: TransactionManager,
        transport: Arc<MockTransport>,
        transport_tx: mpsc::Sender<TransportEvent>,
        events_rx: mpsc::Receiver<TransactionEvent>,
        peer: std::net::SocketAddr,
    }

    fn harness() -> Harness {
        let transport = MockTransport::new();
        let (transport_tx, transport_rx) = mpsc::channel(32);
        let (manager, events_rx) =
            TransactionManager::new(transport.clone(), transport_rx, fast_timers());
        Harness {
            manager,
            transport,
            transport_tx,
            events_rx,
            peer: "127.0.0.1:5070".parse().unwrap(),
        }
    }

    async fn expect_event<F>(rx: &mut mpsc::Receiver<TransactionEvent>, pred: F) -> TransactionEvent
    where
        F: Fn(&TransactionEvent) -> bool,
    {
        loop {
            let event = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    fn build_invite(branch: &str) -> Request {
        RequestBuilder::new(Method::Invite, "sip:bob@biloxi.example.com")
            .unwrap()
            .from("Alice", "sip:alice@atlanta.example.com", Some("a-tag"))
            .to("Bob", "sip:bob@biloxi.example.com", None)
            .via("127.0.0.1:5070", "UDP", Some(branch))
            .build()
    }

    #[tokio::test]
    async fn incoming_invite_creates_server_transaction() {
        let mut h = harness();
        let invite = build_invite(&generate_branch());
        h.transport_tx
            .send(TransportEvent::MessageReceived {
                message: Message::Request(invite),
                source: h.peer,
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();

        let event = expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::InviteRequest { .. })
        })
        .await;
        let TransactionEvent::InviteRequest { transaction_id, .. } = event else {
            unreachable!();
        };
        assert!(h.manager.transaction_exists(&transaction_id));
        assert_eq!(h.manager.remote_addr(&transaction_id).unwrap(), h.peer);
        assert_eq!(
            h.manager
                .original_request(&transaction_id)
                .await
                .unwrap()
                .method,
            Method::Invite
        );
    }

    #[tokio::test]
    async fn client_transaction_round_trip() {
        let mut h = harness();
        let request = RequestBuilder::new(Method::Options, "sip:bob@biloxi.example.com")
            .unwrap()
            .from("Alice", "sip:alice@atlanta.example.com", Some("a-tag"))
            .build();
        // No Via on the request; the manager fills one in.
        let key = h.manager.create_client_transaction(request, h.peer).unwrap();
        h.manager.send_request(&key).await.unwrap();

        h.transport
            .wait_for_message_sent(Duration::from_secs(1))
            .await
            .unwrap();
        let (message, dest) = h.transport.get_sent_message().await.unwrap();
        assert_eq!(dest, h.peer);
        let sent = message.as_request().unwrap().clone();
        assert!(is_rfc3261_branch(sent.branch().unwrap()));

        let ok = ResponseBuilder::from_request(&sent, StatusCode::Ok).build();
        h.transport_tx
            .send(TransportEvent::MessageReceived {
                message: Message::Response(ok),
                source: h.peer,
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();

        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::SuccessResponse { .. })
        })
        .await;
        assert_eq!(
            h.manager.last_response(&key).await.unwrap().unwrap().status,
            StatusCode::Ok
        );
    }

    #[tokio::test]
    async fn stray_response_is_reported() {
        let mut h = harness();
        let invite = build_invite(&generate_branch());
        let response = ResponseBuilder::from_request(&invite, StatusCode::Ok).build();
        h.transport_tx
            .send(TransportEvent::MessageReceived {
                message: Message::Response(response),
                source: h.peer,
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();

        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::StrayResponse { .. })
        })
        .await;
    }

    #[tokio::test]
    async fn retransmitted_request_routes_to_existing_transaction() {
        let mut h = harness();
        let invite = build_invite(&generate_branch());
        for _ in 0..2 {
            h.transport_tx
                .send(TransportEvent::MessageReceived {
                    message: Message::Request(invite.clone()),
                    source: h.peer,
                    destination: "127.0.0.1:5060".parse().unwrap(),
                })
                .await
                .unwrap();
        }
        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::InviteRequest { .. })
        })
        .await;

        // Only one server transaction for both copies.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (_, servers) = h.manager.active_transactions();
        assert_eq!(servers.len(), 1);
    }

    #[tokio::test]
    async fn legacy_branch_request_matches_by_composite() {
        let mut h = harness();
        // Pre-3261 branch: no magic cookie.
        let invite = build_invite("1-old-style-branch");
        for _ in 0..2 {
            h.transport_tx
                .send(TransportEvent::MessageReceived {
                    message: Message::Request(invite.clone()),
                    source: h.peer,
                    destination: "127.0.0.1:5060".parse().unwrap(),
                })
                .await
                .unwrap();
        }
        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::InviteRequest { .. })
        })
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (_, servers) = h.manager.active_transactions();
        assert_eq!(servers.len(), 1);
    }

    #[tokio::test]
    async fn terminated_transaction_lingers_then_goes_away() {
        let mut h = harness();
        let invite = build_invite(&generate_branch());
        h.transport_tx
            .send(TransportEvent::MessageReceived {
                message: Message::Request(invite),
                source: h.peer,
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();
        let event = expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::InviteRequest { .. })
        })
        .await;
        let TransactionEvent::InviteRequest { transaction_id, .. } = event else {
            unreachable!();
        };

        let original = h.manager.original_request(&transaction_id).await.unwrap();
        let ok = ResponseBuilder::from_request(&original, StatusCode::Ok)
            .to_tag("b-tag")
            .build();
        h.manager.send_response(&transaction_id, ok).await.unwrap();

        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::TransactionTerminated { .. })
        })
        .await;
        // Still present during the linger window (200ms in tests)...
        assert!(h.manager.transaction_exists(&transaction_id));
        assert_eq!(
            h.manager.transaction_state(&transaction_id).unwrap(),
            TransactionState::Terminated
        );
        // ...and gone after it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!h.manager.transaction_exists(&transaction_id));
    }

    #[tokio::test]
    async fn invite_retransmit_after_2xx_surfaces_timeout_retransmit() {
        let mut h = harness();
        let invite = build_invite(&generate_branch());
        h.transport_tx
            .send(TransportEvent::MessageReceived {
                message: Message::Request(invite.clone()),
                source: h.peer,
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();
        let event = expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::InviteRequest { .. })
        })
        .await;
        let TransactionEvent::InviteRequest { transaction_id, .. } = event else {
            unreachable!();
        };

        let ok = ResponseBuilder::from_request(&invite, StatusCode::Ok)
            .to_tag("b-tag")
            .build();
        h.manager.send_response(&transaction_id, ok).await.unwrap();
        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::TransactionTerminated { .. })
        })
        .await;

        // Peer did not see the 2xx and retransmits the INVITE.
        h.transport_tx
            .send(TransportEvent::MessageReceived {
                message: Message::Request(invite),
                source: h.peer,
                destination: "127.0.0.1:5060".parse().unwrap(),
            })
            .await
            .unwrap();
        expect_event(&mut h.events_rx, |e| {
            matches!(e, TransactionEvent::TimeoutRetransmit { .. })
        })
        .await;
    }
}
