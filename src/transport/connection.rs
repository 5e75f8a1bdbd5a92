//! Connection lifecycle and heartbeat.
//!
//! The client pings the authority at a fixed interval; the authority echoes
//! the ping unchanged. Each echo yields a round-trip sample for the latency
//! estimator and counts as contact for the disconnect timeout.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::message::{Message, Ping};
use super::timing::LatencyEstimator;
use crate::core::{ConnectionError, NetConfig, PeerId};

/// Which side of the session this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Authority: owns ids and entity lifecycle.
    Server,
    /// Replica of the authority's state.
    Client,
}

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Waiting for the first heartbeat response.
    Connecting,
    /// At least one heartbeat response received.
    Connected,
    /// Timed out, shut down or closed. Terminal.
    Disconnected,
}

/// Observable connection state.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Local role.
    pub role: PeerRole,
    /// Lifecycle phase.
    pub phase: ConnectionPhase,
    /// Set on the first heartbeat response and never cleared.
    pub established: bool,
    /// When the connection attempt started, in clock seconds.
    pub started_at: f64,
    /// Time of the last message from the remote side.
    pub last_contact_time: f64,
    /// Smoothed one-way latency.
    pub latency: LatencyEstimator,
}

/// Result of processing one heartbeat response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSample {
    /// Measured round trip in seconds.
    pub rtt: f64,
    /// Smoothed one-way latency after this sample.
    pub latency: f64,
    /// This response moved the connection to `Connected`.
    pub connected: bool,
}

/// Heartbeat and connection state machine for one endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    local: PeerId,
    state: ConnectionState,
    handshake_timeout: Duration,
    disconnect_timeout: Duration,
}

impl ConnectionManager {
    /// Client side, starting in `Connecting`.
    pub fn client(local: PeerId, config: &NetConfig, now: f64) -> Self {
        Self::with_phase(local, PeerRole::Client, ConnectionPhase::Connecting, config, now)
    }

    /// Authority side, always `Connected`.
    pub fn server(local: PeerId, config: &NetConfig, now: f64) -> Self {
        let mut manager =
            Self::with_phase(local, PeerRole::Server, ConnectionPhase::Connected, config, now);
        manager.state.established = true;
        manager
    }

    fn with_phase(
        local: PeerId,
        role: PeerRole,
        phase: ConnectionPhase,
        config: &NetConfig,
        now: f64,
    ) -> Self {
        Self {
            local,
            state: ConnectionState {
                role,
                phase,
                established: false,
                started_at: now,
                last_contact_time: now,
                latency: LatencyEstimator::new(config.latency_alpha),
            },
            handshake_timeout: config.handshake_timeout,
            disconnect_timeout: config.disconnect_timeout,
        }
    }

    /// Replace the latency estimator, e.g. with a seeded one.
    pub fn with_latency(mut self, latency: LatencyEstimator) -> Self {
        self.state.latency = latency;
        self
    }

    /// Local role.
    pub fn role(&self) -> PeerRole {
        self.state.role
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase
    }

    /// Check if the connection is usable.
    pub fn is_connected(&self) -> bool {
        self.state.phase == ConnectionPhase::Connected
    }

    /// Smoothed one-way latency in seconds.
    pub fn latency(&self) -> f64 {
        self.state.latency.latency()
    }

    /// Full state snapshot.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Build a heartbeat request stamped with `now`.
    pub fn ping_request(&self, now: f64) -> Message {
        Message::PingRequest(Ping {
            time: now,
            sender_id: self.local,
        })
    }

    /// Authority: echo a heartbeat back unchanged.
    pub fn on_ping_request(&self, ping: &Ping) -> Message {
        Message::PingResponse(ping.clone())
    }

    /// Client: process a heartbeat echo.
    ///
    /// Returns `None` for echoes that are not ours or that arrive after
    /// disconnection.
    pub fn on_ping_response(&mut self, ping: &Ping, now: f64) -> Option<PingSample> {
        if self.state.phase == ConnectionPhase::Disconnected {
            return None;
        }
        if ping.sender_id != self.local {
            debug!(sender = %ping.sender_id, "ignoring heartbeat echo for another peer");
            return None;
        }

        let rtt = now - ping.time;
        let latency = self.state.latency.update(rtt);
        self.state.last_contact_time = now;

        let connected = self.state.phase == ConnectionPhase::Connecting;
        if connected {
            self.state.phase = ConnectionPhase::Connected;
            self.state.established = true;
            info!(rtt_ms = rtt * 1000.0, "connected");
        }

        Some(PingSample {
            rtt,
            latency,
            connected,
        })
    }

    /// Record contact from the remote side.
    pub fn touch(&mut self, now: f64) {
        if now > self.state.last_contact_time {
            self.state.last_contact_time = now;
        }
    }

    /// Enforce the handshake and disconnect timeouts.
    ///
    /// A timeout moves the connection to `Disconnected` and is reported
    /// exactly once; later calls return `Ok`.
    pub fn check(&mut self, now: f64) -> Result<(), ConnectionError> {
        if self.state.role == PeerRole::Server {
            return Ok(());
        }

        match self.state.phase {
            ConnectionPhase::Connecting => {
                let waited = secs(now - self.state.started_at);
                if waited >= self.handshake_timeout {
                    self.state.phase = ConnectionPhase::Disconnected;
                    warn!(waited_ms = waited.as_millis() as u64, "handshake timed out");
                    return Err(ConnectionError::HandshakeTimeout { waited });
                }
            }
            ConnectionPhase::Connected => {
                let silent = secs(now - self.state.last_contact_time);
                if silent >= self.disconnect_timeout {
                    self.state.phase = ConnectionPhase::Disconnected;
                    warn!(silent_ms = silent.as_millis() as u64, "connection timed out");
                    return Err(ConnectionError::TimedOut { silent });
                }
            }
            ConnectionPhase::Disconnected => {}
        }
        Ok(())
    }

    /// Close the connection. Returns `false` if it was already closed.
    pub fn disconnect(&mut self) -> bool {
        if self.state.phase == ConnectionPhase::Disconnected {
            return false;
        }
        self.state.phase = ConnectionPhase::Disconnected;
        true
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
