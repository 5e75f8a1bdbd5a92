//! Inbound queue.
//!
//! Background loops never touch session state. They turn what they observe
//! into [`Inbound`] items and the session applies them on its next tick.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::core::{NetConfig, NetError, PeerId, Transport};
use crate::transport::{Message, Reassembler};

/// One item for the session to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A complete, decoded message.
    Message {
        /// Transport-level sender.
        from: PeerId,
        /// The message.
        message: Message,
    },
    /// The peer directory gained a peer.
    PeerJoined(PeerId),
    /// The peer directory lost a peer.
    PeerLeft(PeerId),
    /// Missing-object requests should be checked for re-sending.
    RetryDue,
}

/// Sending half of the session queue.
pub type InboundSender = mpsc::UnboundedSender<Inbound>;

/// Drains the transport, reassembles fragments and enqueues messages.
///
/// The pump owns the reassembly buffers; only the receive loop touches them.
pub struct InboundPump {
    transport: Arc<dyn Transport>,
    reassembler: Reassembler,
    tx: InboundSender,
    max_len: usize,
}

impl InboundPump {
    /// Create a pump feeding `tx`.
    pub fn new(transport: Arc<dyn Transport>, config: &NetConfig, tx: InboundSender) -> Self {
        let max_len = transport.max_datagram_size().max(config.max_datagram_size);
        Self {
            transport,
            reassembler: Reassembler::from_config(config),
            tx,
            max_len,
        }
    }

    /// Incomplete messages held.
    pub fn pending_reassemblies(&self) -> usize {
        self.reassembler.pending()
    }

    /// Receive every pending datagram and enqueue the complete messages.
    ///
    /// Malformed datagrams are logged and dropped. Returns the number of
    /// messages enqueued, or [`NetError::QueueClosed`] once the session is
    /// gone.
    pub fn poll_once(&mut self, now: Instant) -> Result<usize, NetError> {
        self.reassembler.evict_expired(now);

        let mut enqueued = 0;
        while let Some((from, bytes)) = self.transport.try_receive(self.max_len) {
            let message = match Message::decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    warn!(peer = %from, error = %e, "dropping malformed datagram");
                    continue;
                }
            };

            let message = match message {
                Message::Fragment(fragment) => match self.reassembler.on_fragment(fragment, now) {
                    Ok(Some(Message::Fragment(_))) => {
                        warn!(peer = %from, "dropping nested fragment");
                        continue;
                    }
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(peer = %from, error = %e, "dropping fragment");
                        continue;
                    }
                },
                message => message,
            };

            trace!(peer = %from, kind = message.kind(), "enqueue");
            self.tx
                .send(Inbound::Message { from, message })
                .map_err(|_| NetError::QueueClosed)?;
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NetworkId;
    use crate::transport::{Fragmenter, MemoryNetwork, RemoveObject, SceneObject, SceneSnapshot};

    fn setup() -> (MemoryNetwork, InboundPump, mpsc::UnboundedReceiver<Inbound>) {
        let network = MemoryNetwork::new(1200);
        let transport: Arc<dyn Transport> = Arc::new(network.endpoint(PeerId(2)));
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = InboundPump::new(transport, &NetConfig::default(), tx);
        (network, pump, rx)
    }

    #[test]
    fn test_plain_message_enqueued() {
        let (network, mut pump, mut rx) = setup();
        let server = network.endpoint(PeerId(1));
        let message = Message::RemoveObject(RemoveObject { network_id: NetworkId(7) });
        server.send(PeerId(2), &message.encode().unwrap());

        assert_eq!(pump.poll_once(Instant::now()).unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), Inbound::Message { from: PeerId(1), message });
    }

    #[test]
    fn test_malformed_dropped() {
        let (network, mut pump, mut rx) = setup();
        let server = network.endpoint(PeerId(1));
        server.send(PeerId(2), b"not json");
        server.send(PeerId(2), br#"{"no_type": 1}"#);
        server.send(PeerId(2), br#"{"type": "remove_object", "network_id": "x"}"#);

        assert_eq!(pump.poll_once(Instant::now()).unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fragments_reassembled_out_of_order() {
        let (network, mut pump, mut rx) = setup();
        let server = network.endpoint(PeerId(1));
        network.reverse(true);

        let snapshot = Message::SceneSync(SceneSnapshot {
            scene_id: "arena".into(),
            objects: (1..=80)
                .map(|id| SceneObject {
                    class_name: "Food".into(),
                    network_id: NetworkId(id),
                    owner_id: PeerId(1),
                })
                .collect(),
        });
        let sent = Fragmenter::for_datagram(1200, 200)
            .unwrap()
            .send_large(&server, PeerId(2), &snapshot)
            .unwrap();
        assert!(sent > 1);

        assert_eq!(pump.poll_once(Instant::now()).unwrap(), 1);
        assert_eq!(pump.pending_reassemblies(), 0);
        match rx.try_recv().unwrap() {
            Inbound::Message { message, .. } => assert_eq!(message, snapshot),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_message_held() {
        let (network, mut pump, mut rx) = setup();
        let server = network.endpoint(PeerId(1));
        let fragments = Fragmenter::with_max_payload(8)
            .fragment(&Message::ServerShutdown)
            .unwrap();
        assert!(fragments.len() > 1);

        let first = Message::Fragment(fragments[0].clone()).encode().unwrap();
        server.send(PeerId(2), &first);
        assert_eq!(pump.poll_once(Instant::now()).unwrap(), 0);
        assert_eq!(pump.pending_reassemblies(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_reported() {
        let (network, mut pump, rx) = setup();
        drop(rx);
        let server = network.endpoint(PeerId(1));
        server.send(PeerId(2), &Message::ServerShutdown.encode().unwrap());
        assert!(matches!(pump.poll_once(Instant::now()), Err(NetError::QueueClosed)));
    }
}
