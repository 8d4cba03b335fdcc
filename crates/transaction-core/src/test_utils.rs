//! Mock transport and helpers for the unit tests of the four machines.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use sipline_sip_core::Message;

use crate::error::{Error, Result};
use crate::timer::TimerSettings;
use crate::transport::Transport;

#[derive(Debug)]
pub struct MockTransport {
    sent_messages: Mutex<VecDeque<(Message, SocketAddr)>>,
    local_addr: SocketAddr,
    reliable: bool,
    fail_sends: AtomicBool,
    message_sent_notifier: Arc<Notify>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_reliability(false)
    }

    pub fn reliable() -> Arc<Self> {
        Self::with_reliability(true)
    }

    fn with_reliability(reliable: bool) -> Arc<Self> {
        Arc::new(MockTransport {
            sent_messages: Mutex::new(VecDeque::new()),
            local_addr: "127.0.0.1:5060".parse().unwrap(),
            reliable,
            fail_sends: AtomicBool::new(false),
            message_sent_notifier: Arc::new(Notify::new()),
        })
    }

    /// Makes every subsequent send fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub async fn get_sent_message(&self) -> Option<(Message, SocketAddr)> {
        self.sent_messages.lock().await.pop_front()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent_messages.lock().await.len()
    }

    /// Waits until a message has been sent, with a timeout.
    pub async fn wait_for_message_sent(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.message_sent_notifier.notified())
            .await
            .map_err(|_| Error::Other("timed out waiting for sent message".to_string()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::TransportError("mock send failure".to_string()));
        }
        self.sent_messages
            .lock()
            .await
            .push_back((message, destination));
        self.message_sent_notifier.notify_waiters();
        Ok(())
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Compressed timer table so state-machine tests finish in milliseconds.
pub fn fast_timers() -> TimerSettings {
    TimerSettings {
        t1: Duration::from_millis(50),
        t2: Duration::from_millis(200),
        t4: Duration::from_millis(100),
        transaction_timeout: Duration::from_millis(400),
        wait_time_d: Duration::from_millis(150),
        wait_time_h: Duration::from_millis(400),
        wait_time_i: Duration::from_millis(100),
        wait_time_j: Duration::from_millis(150),
        wait_time_k: Duration::from_millis(100),
        trying_grace: Duration::from_millis(50),
        linger: Duration::from_millis(200),
    }
}
