//! Background loops.
//!
//! Each loop owns what it touches (the receive loop owns the reassembler)
//! and talks to the session only through its inbound queue. Every loop
//! checks a shared running flag once per iteration; shutdown is cooperative.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::core::{Clock, NetError, PeerId, Transport};
use crate::session::{Inbound, InboundPump, InboundSender, NetSession, PeerWatcher, Role};
use crate::transport::{Message, Ping};

/// Client heartbeat sender, independent of the session.
#[derive(Clone)]
pub struct Heartbeat {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    local: PeerId,
    server: PeerId,
}

impl Heartbeat {
    /// Heartbeat from `session` to its authority. `None` on the authority.
    pub fn for_session(session: &NetSession) -> Option<Self> {
        match session.role() {
            Role::Client { server } => Some(Self {
                transport: session.transport(),
                clock: session.clock(),
                local: session.local_peer_id(),
                server,
            }),
            Role::Server => None,
        }
    }

    /// Send one ping stamped with the current time.
    pub fn beat(&self) -> Result<(), NetError> {
        let ping = Message::PingRequest(Ping {
            time: self.clock.now(),
            sender_id: self.local,
        });
        let bytes = ping.encode()?;
        if !self.transport.send(self.server, &bytes) {
            return Err(NetError::SendFailed(self.server));
        }
        Ok(())
    }
}

/// Handle on the background loops of one session.
///
/// Dropping the driver stops the loops without waiting for them.
pub struct NetDriver {
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetDriver {
    /// Start the loops for `session` on the current tokio runtime.
    ///
    /// - receive and peer directory bookkeeping: every role
    /// - heartbeat and missing-object retry ticker: client
    ///
    /// A client learns from the directory when the authority leaves.
    pub fn spawn(session: &NetSession) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let config = session.config().clone();
        let tx = session.inbound_sender();
        let mut tasks = Vec::new();

        let pump = InboundPump::new(session.transport(), &config, tx.clone());
        tasks.push(tokio::spawn(receive_loop(
            pump,
            Arc::clone(&running),
            config.recv_poll_interval,
        )));

        let watcher = PeerWatcher::new(session.transport(), tx.clone());
        tasks.push(tokio::spawn(peer_loop(
            watcher,
            Arc::clone(&running),
            config.peer_poll_interval,
        )));

        if let Some(heartbeat) = Heartbeat::for_session(session) {
            tasks.push(tokio::spawn(heartbeat_loop(
                heartbeat,
                Arc::clone(&running),
                config.ping_interval,
            )));
            let ticker = RetryTicker {
                tx,
                queued: session.retry_queued(),
            };
            let period = (config.missing_object_retry_interval / 2).max(Duration::from_millis(1));
            tasks.push(tokio::spawn(retry_loop(ticker, Arc::clone(&running), period)));
        }

        debug!(loops = tasks.len(), "driver started");
        Self { running, tasks }
    }

    /// Check if the loops were not told to stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tell every loop to stop after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop every loop and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "background loop panicked");
            }
        }
        debug!("driver stopped");
    }
}

impl Drop for NetDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(mut pump: InboundPump, running: Arc<AtomicBool>, period: Duration) {
    while running.load(Ordering::SeqCst) {
        match pump.poll_once(Instant::now()) {
            Ok(0) => {}
            Ok(count) => trace!(count, "received"),
            Err(NetError::QueueClosed) => break,
            Err(e) => warn!(error = %e, "receive failed"),
        }
        tokio::time::sleep(period).await;
    }
}

async fn heartbeat_loop(heartbeat: Heartbeat, running: Arc<AtomicBool>, period: Duration) {
    while running.load(Ordering::SeqCst) {
        if let Err(e) = heartbeat.beat() {
            debug!(error = %e, "heartbeat not sent");
        }
        tokio::time::sleep(period).await;
    }
}

async fn peer_loop(mut watcher: PeerWatcher, running: Arc<AtomicBool>, period: Duration) {
    while running.load(Ordering::SeqCst) {
        if let Err(NetError::QueueClosed) = watcher.poll_once() {
            break;
        }
        tokio::time::sleep(period).await;
    }
}

/// Retry notifications, at most one in the queue at a time.
struct RetryTicker {
    tx: InboundSender,
    queued: Arc<AtomicBool>,
}

impl RetryTicker {
    fn notify(&self) -> Result<(), NetError> {
        if self.queued.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.tx.send(Inbound::RetryDue).map_err(|_| NetError::QueueClosed)
    }
}

async fn retry_loop(ticker: RetryTicker, running: Arc<AtomicBool>, period: Duration) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(period).await;
        if ticker.notify().is_err() {
            break;
        }
    }
}
