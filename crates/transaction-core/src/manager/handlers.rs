//! Message routing: transport events into the right transaction, with
//! the RFC 3261 branch rules first, the pre-3261 composite fallback
//! second, and the ACK/CANCEL special cases on top.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use sipline_sip_core::prelude::*;

use crate::error::{Error, Result};
use crate::manager::TransactionManager;
use crate::server::ServerTransaction;
use crate::transaction::key::matches_legacy_server;
use crate::transaction::{TransactionEvent, TransactionKey, TransactionState};
use crate::utils;

impl TransactionManager {
    pub(crate) async fn handle_transport_event(&self, event: crate::transport::TransportEvent) -> Result<()> {
        match event {
            crate::transport::TransportEvent::MessageReceived {
                message, source, ..
            } => self.handle_message(message, source).await,
            crate::transport::TransportEvent::Error { error } => {
                warn!(%error, "transport reported an error");
                self.emit(TransactionEvent::Error {
                    error,
                    transaction_id: None,
                })
                .await;
                Ok(())
            }
            crate::transport::TransportEvent::Closed => {
                debug!("transport closed");
                Ok(())
            }
        }
    }

    async fn handle_message(&self, message: Message, source: SocketAddr) -> Result<()> {
        match message {
            Message::Request(request) => match request.method {
                Method::Ack => self.handle_ack(request, source).await,
                Method::Cancel => self.handle_cancel(request, source).await,
                _ => self.handle_request(request, source).await,
            },
            Message::Response(response) => self.handle_response(response, source).await,
        }
    }

    /// Non-ACK, non-CANCEL requests: match an existing server
    /// transaction (branch first, composite fallback for pre-3261
    /// branches) or start a new one and tell the TU.
    async fn handle_request(&self, request: Request, source: SocketAddr) -> Result<()> {
        let key = TransactionKey::from_request(&request, true);

        if let Some(ref key) = key {
            if let Some(tx) = self.server_transaction(key) {
                return self.route_to_server(key.clone(), tx, request).await;
            }
            // A non-3261 branch value is not a reliable identifier;
            // fall back to the composite match before creating a
            // duplicate transaction.
            if !key.is_rfc3261() {
                if let Some((found_key, tx)) = self.find_server_by_legacy(&request).await {
                    return self.route_to_server(found_key, tx, request).await;
                }
            }
        } else {
            if let Some((found_key, tx)) = self.find_server_by_legacy(&request).await {
                return self.route_to_server(found_key, tx, request).await;
            }
            warn!(method = %request.method, "request without Via branch matched nothing");
            self.emit(TransactionEvent::StrayRequest { request, source })
                .await;
            return Ok(());
        }

        let key = self.create_server_transaction(request.clone(), source)?;
        if request.method == Method::Invite {
            self.emit(TransactionEvent::InviteRequest {
                transaction_id: key,
                request,
                source,
            })
            .await;
        } else {
            self.emit(TransactionEvent::NonInviteRequest {
                transaction_id: key,
                request,
                source,
            })
            .await;
        }
        Ok(())
    }

    async fn handle_response(&self, response: Response, source: SocketAddr) -> Result<()> {
        let Some(key) = TransactionKey::from_response(&response) else {
            self.emit(TransactionEvent::StrayResponse { response, source })
                .await;
            return Ok(());
        };
        let Some(tx) = self
            .client_transactions
            .get(&key)
            .map(|e| e.value().clone())
        else {
            trace!(%key, "response matched no client transaction");
            self.emit(TransactionEvent::StrayResponse { response, source })
                .await;
            return Ok(());
        };

        if tx.state() == TransactionState::Terminated {
            // An INVITE client transaction terminates on the first 2xx,
            // but every 2xx (retransmissions, forked answers) still
            // belongs to the TU.
            if response.status.is_success() && key.method().is_invite() {
                self.emit(TransactionEvent::SuccessResponse {
                    transaction_id: key,
                    response,
                    need_ack: true,
                    source,
                })
                .await;
            } else {
                trace!(%key, "absorbing response for terminated transaction");
            }
            return Ok(());
        }
        tx.process_response(response).await
    }

    /// ACK matches the INVITE server transaction by branch (non-2xx
    /// case). Failing that, a dialog-identifier walk catches ACKs whose
    /// branch differs (2xx ACK is its own "transaction") before giving
    /// up with a stray event.
    async fn handle_ack(&self, ack: Request, source: SocketAddr) -> Result<()> {
        if let Some(key) =
            TransactionKey::from_request(&ack, true).map(|k| k.with_method(Method::Invite))
        {
            if let Some(tx) = self.server_transaction(&key) {
                return self.deliver_ack(key, tx, ack).await;
            }
        }
        if let Some((key, tx)) = self.find_server_by_legacy(&ack).await {
            return self.deliver_ack(key, tx, ack).await;
        }
        debug!("ACK matched no transaction");
        self.emit(TransactionEvent::StrayAck {
            request: ack,
            source,
        })
        .await;
        Ok(())
    }

    async fn deliver_ack(
        &self,
        key: TransactionKey,
        tx: Arc<dyn ServerTransaction>,
        ack: Request,
    ) -> Result<()> {
        if tx.state() == TransactionState::Terminated {
            // 2xx case: the transaction is gone but still lingering;
            // the ACK belongs to the TU/dialog.
            self.emit(TransactionEvent::AckReceived {
                transaction_id: key,
                request: ack,
            })
            .await;
            return Ok(());
        }
        tx.process_request(ack).await
    }

    /// CANCEL: answered by the transaction layer itself. The CANCEL
    /// gets its own server transaction and an immediate 200; the
    /// matched INVITE is answered with 487 when still unanswered, and
    /// the TU learns about it through `CancelReceived`. A CANCEL that
    /// matches nothing gets 481.
    async fn handle_cancel(&self, cancel: Request, source: SocketAddr) -> Result<()> {
        let cancel_key = TransactionKey::from_request(&cancel, true);

        // CANCEL retransmissions route to the CANCEL's own transaction.
        if let Some(ref key) = cancel_key {
            if let Some(tx) = self.server_transaction(key) {
                return self.route_to_server(key.clone(), tx, cancel).await;
            }
        }

        let invite = match cancel_key
            .as_ref()
            .map(|k| k.with_method(Method::Invite))
            .and_then(|k| self.server_transaction(&k).map(|tx| (k, tx)))
        {
            Some(found) => Some(found),
            None => self.find_server_by_legacy(&cancel).await,
        };

        let Some((invite_key, invite_tx)) = invite else {
            debug!("CANCEL matched no INVITE transaction, answering 481");
            let response = utils::create_response(
                &cancel,
                StatusCode::CallOrTransactionDoesNotExist,
            );
            self.transport
                .send_message(Message::Response(response), source)
                .await
                .map_err(|e| Error::transport_error(e, "failed to send 481"))?;
            self.emit(TransactionEvent::StrayCancel {
                request: cancel,
                source,
            })
            .await;
            return Ok(());
        };

        // The CANCEL forms its own non-INVITE server transaction so its
        // retransmissions are absorbed, and it is answered 200 here.
        if cancel_key.is_some() {
            let key = self.create_server_transaction(cancel.clone(), source)?;
            self.send_response(&key, utils::create_ok_for_cancel(&cancel))
                .await?;
        } else {
            // Legacy CANCEL without a branch; answer it statelessly.
            let ok = utils::create_ok_for_cancel(&cancel);
            self.transport
                .send_message(Message::Response(ok), source)
                .await
                .map_err(|e| Error::transport_error(e, "failed to answer CANCEL"))?;
        }

        self.emit(TransactionEvent::CancelReceived {
            transaction_id: invite_key.clone(),
            cancel_request: cancel,
        })
        .await;

        // An unanswered INVITE is told 487; once a final response is
        // out, the CANCEL changes nothing.
        if matches!(
            invite_tx.state(),
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            let original = invite_tx.original_request().await;
            invite_tx
                .send_response(utils::create_request_terminated_response(&original))
                .await?;
        } else {
            trace!(%invite_key, "CANCEL arrived after final response");
        }
        Ok(())
    }

    async fn route_to_server(
        &self,
        key: TransactionKey,
        tx: Arc<dyn ServerTransaction>,
        request: Request,
    ) -> Result<()> {
        if tx.state() == TransactionState::Terminated {
            // Lingering entry. An INVITE retransmission after a 2xx
            // means the peer has not seen the 2xx; that retransmission
            // is the TU's cue (it owns 2xx retransmits).
            if request.method == Method::Invite {
                if let Some(response) = tx.last_response().await {
                    if response.status.is_success() {
                        self.emit(TransactionEvent::TimeoutRetransmit {
                            transaction_id: key,
                            request,
                        })
                        .await;
                        return Ok(());
                    }
                }
            }
            trace!(%key, "absorbing retransmission for lingering transaction");
            return Ok(());
        }
        tx.process_request(request).await
    }

    fn server_transaction(&self, key: &TransactionKey) -> Option<Arc<dyn ServerTransaction>> {
        self.server_transactions
            .get(key)
            .map(|entry| entry.value().clone())
    }

    /// Pre-3261 composite matching: walks the server table comparing
    /// header tuples. Arc clones are collected first so no map guard is
    /// held across an await.
    async fn find_server_by_legacy(
        &self,
        request: &Request,
    ) -> Option<(TransactionKey, Arc<dyn ServerTransaction>)> {
        let candidates: Vec<_> = self
            .server_transactions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (key, tx) in candidates {
            let original = tx.original_request().await;
            if matches_legacy_server(request, &original) {
                return Some((key, tx));
            }
        }
        None
    }
}
