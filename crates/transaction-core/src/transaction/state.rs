use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};
use crate::transaction::{TransactionKey, TransactionKind};

/// States a transaction moves through (RFC 3261 Section 17).
///
/// Not every kind visits every state: `Calling` is INVITE-client only,
/// `Confirmed` is INVITE-server only, and `Trying` covers both
/// non-INVITE machines and the brief INVITE-server window before any
/// response has gone out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Freshly constructed, nothing sent or received yet.
    Initial,
    /// INVITE client: request sent, no response yet.
    Calling,
    /// Non-INVITE machines and the INVITE server before any response.
    Trying,
    /// A provisional response has been sent or received.
    Proceeding,
    /// A final response has been sent or received; absorbing retransmissions.
    Completed,
    /// INVITE server only: ACK received, absorbing ACK retransmissions.
    Confirmed,
    /// The machine is done; the transaction lingers only for matching.
    Terminated,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Initial,
            1 => TransactionState::Calling,
            2 => TransactionState::Trying,
            3 => TransactionState::Proceeding,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TransactionState::Initial => 0,
            TransactionState::Calling => 1,
            TransactionState::Trying => 2,
            TransactionState::Proceeding => 3,
            TransactionState::Completed => 4,
            TransactionState::Confirmed => 5,
            TransactionState::Terminated => 6,
        }
    }

    /// Whether `from -> to` is legal for a machine of kind `kind`.
    ///
    /// A same-state "transition" is always accepted as a no-op, and any
    /// state may jump to `Terminated` (transport errors and shutdown
    /// take that path).
    pub fn is_valid_transition(kind: TransactionKind, from: Self, to: Self) -> bool {
        use TransactionState::*;
        if from == to || to == Terminated {
            return true;
        }
        match kind {
            TransactionKind::InviteClient => matches!(
                (from, to),
                (Initial, Calling) | (Calling, Proceeding) | (Calling, Completed)
                    | (Proceeding, Completed)
            ),
            TransactionKind::NonInviteClient => matches!(
                (from, to),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed)
                    | (Proceeding, Completed)
            ),
            TransactionKind::InviteServer => matches!(
                (from, to),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed)
                    | (Proceeding, Completed) | (Completed, Confirmed)
            ),
            TransactionKind::NonInviteServer => matches!(
                (from, to),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed)
                    | (Proceeding, Completed)
            ),
        }
    }
}

/// Lock-free state cell shared between a transaction's public handle and
/// its event loop.
#[derive(Debug)]
pub struct AtomicTransactionState {
    state: AtomicU8,
}

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        AtomicTransactionState {
            state: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Stores `state` and returns the previous state.
    pub fn set(&self, state: TransactionState) -> TransactionState {
        TransactionState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst))
    }

    /// Validates `from -> to` for `kind`, returning an error describing
    /// the rejected transition.
    pub fn validate_transition(
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
        key: &TransactionKey,
    ) -> Result<()> {
        if TransactionState::is_valid_transition(kind, from, to) {
            Ok(())
        } else {
            Err(Error::invalid_state_transition(
                kind,
                from,
                to,
                Some(key.clone()),
            ))
        }
    }
}

impl Default for AtomicTransactionState {
    fn default() -> Self {
        AtomicTransactionState::new(TransactionState::Initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipline_sip_core::Method;

    #[test]
    fn atomic_state_roundtrip() {
        let state = AtomicTransactionState::new(TransactionState::Calling);
        assert_eq!(state.get(), TransactionState::Calling);
        let prev = state.set(TransactionState::Proceeding);
        assert_eq!(prev, TransactionState::Calling);
        assert_eq!(state.get(), TransactionState::Proceeding);
    }

    #[test]
    fn invite_client_transitions() {
        use TransactionState::*;
        let kind = TransactionKind::InviteClient;
        assert!(TransactionState::is_valid_transition(kind, Initial, Calling));
        assert!(TransactionState::is_valid_transition(kind, Calling, Proceeding));
        assert!(TransactionState::is_valid_transition(kind, Calling, Completed));
        assert!(TransactionState::is_valid_transition(kind, Calling, Terminated));
        assert!(TransactionState::is_valid_transition(kind, Proceeding, Completed));
        assert!(!TransactionState::is_valid_transition(kind, Initial, Trying));
        assert!(!TransactionState::is_valid_transition(kind, Completed, Confirmed));
        assert!(!TransactionState::is_valid_transition(kind, Completed, Proceeding));
    }

    #[test]
    fn invite_server_transitions() {
        use TransactionState::*;
        let kind = TransactionKind::InviteServer;
        assert!(TransactionState::is_valid_transition(kind, Initial, Trying));
        assert!(TransactionState::is_valid_transition(kind, Trying, Proceeding));
        assert!(TransactionState::is_valid_transition(kind, Trying, Completed));
        assert!(TransactionState::is_valid_transition(kind, Proceeding, Completed));
        assert!(TransactionState::is_valid_transition(kind, Completed, Confirmed));
        assert!(TransactionState::is_valid_transition(kind, Proceeding, Terminated));
        assert!(!TransactionState::is_valid_transition(kind, Initial, Calling));
        assert!(!TransactionState::is_valid_transition(kind, Confirmed, Completed));
    }

    #[test]
    fn non_invite_transitions() {
        use TransactionState::*;
        for kind in [TransactionKind::NonInviteClient, TransactionKind::NonInviteServer] {
            assert!(TransactionState::is_valid_transition(kind, Initial, Trying));
            assert!(TransactionState::is_valid_transition(kind, Trying, Proceeding));
            assert!(TransactionState::is_valid_transition(kind, Trying, Completed));
            assert!(TransactionState::is_valid_transition(kind, Proceeding, Completed));
            assert!(!TransactionState::is_valid_transition(kind, Completed, Confirmed));
            assert!(!TransactionState::is_valid_transition(kind, Initial, Calling));
        }
    }

    #[test]
    fn validate_transition_reports_key() {
        let key = TransactionKey::new("z9hG4bKx", Method::Invite, false);
        let err = AtomicTransactionState::validate_transition(
            TransactionKind::InviteClient,
            TransactionState::Completed,
            TransactionState::Proceeding,
            &key,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition(_)));
    }
}
