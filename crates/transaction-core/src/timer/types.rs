use std::fmt;
use std::time::Duration;

/// The RFC 3261 transaction timers, plus `Trying100`: the grace window
/// before an INVITE server machine sends 100 Trying on the TU's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerType {
    /// INVITE client retransmission (unreliable transports only).
    A,
    /// INVITE client transaction timeout.
    B,
    /// INVITE client wait in Completed for response retransmissions.
    D,
    /// Non-INVITE client retransmission.
    E,
    /// Non-INVITE client transaction timeout.
    F,
    /// INVITE server response retransmission in Completed.
    G,
    /// INVITE server wait for ACK.
    H,
    /// INVITE server wait in Confirmed for ACK retransmissions.
    I,
    /// Non-INVITE server wait in Completed for request retransmissions.
    J,
    /// Non-INVITE client wait in Completed.
    K,
    /// INVITE server auto-100 grace window.
    Trying100,
}

impl TimerType {
    /// The name carried in [`InternalTransactionCommand::Timer`].
    ///
    /// [`InternalTransactionCommand::Timer`]: crate::transaction::InternalTransactionCommand::Timer
    pub fn name(&self) -> &'static str {
        match self {
            TimerType::A => "A",
            TimerType::B => "B",
            TimerType::D => "D",
            TimerType::E => "E",
            TimerType::F => "F",
            TimerType::G => "G",
            TimerType::H => "H",
            TimerType::I => "I",
            TimerType::J => "J",
            TimerType::K => "K",
            TimerType::Trying100 => "Trying100",
        }
    }
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timer durations, derived from T1/T2/T4 (RFC 3261 Section 17, table in
/// Appendix A). All fields are overridable; tests compress them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSettings {
    /// RTT estimate. Base for retransmission intervals.
    pub t1: Duration,
    /// Retransmission interval cap for Timers A/E/G backoff.
    pub t2: Duration,
    /// Maximum lifetime of a message in the network.
    pub t4: Duration,
    /// Timers B and F: 64*T1.
    pub transaction_timeout: Duration,
    /// Timer D (INVITE client Completed wait), >= 32s on unreliable.
    pub wait_time_d: Duration,
    /// Timer H (INVITE server ACK wait): 64*T1.
    pub wait_time_h: Duration,
    /// Timer I (INVITE server Confirmed wait): T4.
    pub wait_time_i: Duration,
    /// Timer J (non-INVITE server Completed wait): 64*T1.
    pub wait_time_j: Duration,
    /// Timer K (non-INVITE client Completed wait): T4.
    pub wait_time_k: Duration,
    /// How long an INVITE server machine waits for the TU before
    /// sending 100 Trying itself.
    pub trying_grace: Duration,
    /// How long a terminated transaction stays matchable in the table.
    pub linger: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        TimerSettings {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            transaction_timeout: t1 * 64,
            wait_time_d: Duration::from_secs(32),
            wait_time_h: t1 * 64,
            wait_time_i: Duration::from_secs(5),
            wait_time_j: t1 * 64,
            wait_time_k: Duration::from_secs(5),
            trying_grace: Duration::from_millis(200),
            linger: Duration::from_secs(32),
        }
    }
}

impl TimerSettings {
    /// Adjusts the wait timers for transport reliability: on reliable
    /// transports D, I, J, K and the linger window drop to zero (the
    /// transport will not retransmit, so there is nothing to absorb).
    /// Retransmission timers A/E/G are not represented here; machines
    /// skip starting them when the transport is reliable.
    pub fn for_transport(&self, reliable: bool) -> TimerSettings {
        if !reliable {
            return self.clone();
        }
        TimerSettings {
            wait_time_d: Duration::ZERO,
            wait_time_i: Duration::ZERO,
            wait_time_j: Duration::ZERO,
            wait_time_k: Duration::ZERO,
            linger: Duration::ZERO,
            ..self.clone()
        }
    }
}
