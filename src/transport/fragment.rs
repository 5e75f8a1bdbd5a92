//! Fragmentation and reassembly.
//!
//! Logical messages larger than one datagram are split into fragments that
//! share a random message id. Reassembly is keyed by fragment index, so
//! arrival order does not matter; a lost fragment stalls its message until
//! the buffer is evicted.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::message::Message;
use crate::core::{FragmentError, NetConfig, PeerId, Transport};

/// One bounded-size slice of a larger serialized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Token shared by all fragments of one message.
    pub message_id: String,
    /// Number of fragments in the message.
    pub total_fragments: u32,
    /// Position of this fragment, from 0.
    pub fragment_index: u32,
    /// Raw chunk.
    pub data: Vec<u8>,
}

/// Splits outbound messages into fragments.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    max_payload: usize,
}

impl Fragmenter {
    /// Size chunks so that each encoded fragment fits `max_datagram`.
    ///
    /// Fragment data is base64 encoded, which grows it by 4/3, and
    /// `header_reserve` bytes are kept for the JSON envelope.
    pub fn for_datagram(max_datagram: usize, header_reserve: usize) -> Result<Self, FragmentError> {
        let room = max_datagram.saturating_sub(header_reserve);
        let max_payload = room / 4 * 3;
        if max_payload == 0 {
            return Err(FragmentError::NoPayloadRoom {
                max_datagram,
                header_reserve,
            });
        }
        Ok(Self { max_payload })
    }

    /// Build from session configuration.
    pub fn from_config(config: &NetConfig) -> Result<Self, FragmentError> {
        Self::for_datagram(config.max_datagram_size, config.fragment_header_reserve)
    }

    /// Use a fixed raw chunk size.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.max(1),
        }
    }

    /// Raw bytes carried per fragment.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Number of fragments needed for `len` bytes.
    pub fn fragment_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_payload).max(1)
    }

    /// Split raw bytes into fragments tagged with a fresh message id.
    pub fn split(&self, bytes: &[u8]) -> Vec<Fragment> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let total = self.fragment_count(bytes.len());

        if bytes.is_empty() {
            return vec![Fragment {
                message_id,
                total_fragments: 1,
                fragment_index: 0,
                data: Vec::new(),
            }];
        }

        bytes
            .chunks(self.max_payload)
            .enumerate()
            .map(|(index, chunk)| Fragment {
                message_id: message_id.clone(),
                total_fragments: total as u32,
                fragment_index: index as u32,
                data: chunk.to_vec(),
            })
            .collect()
    }

    /// Serialize a message and split it.
    pub fn fragment(&self, message: &Message) -> Result<Vec<Fragment>, FragmentError> {
        let bytes = message.encode()?;
        Ok(self.split(&bytes))
    }

    /// Serialize, split and send a message in index order.
    ///
    /// No acknowledgment is awaited. Returns the number of fragments sent.
    pub fn send_large(
        &self,
        transport: &dyn Transport,
        peer: PeerId,
        message: &Message,
    ) -> Result<usize, FragmentError> {
        let fragments = self.fragment(message)?;
        let count = fragments.len();
        for fragment in fragments {
            let index = fragment.fragment_index;
            let bytes = Message::Fragment(fragment).encode()?;
            if !transport.send(peer, &bytes) {
                return Err(FragmentError::SendFailed { peer, index });
            }
        }
        trace!(peer = %peer, kind = message.kind(), fragments = count, "sent fragmented message");
        Ok(count)
    }
}

/// Chunks received so far for one message id.
#[derive(Debug)]
struct ReassemblyBuffer {
    total: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
    created: Instant,
}

/// Reassembles inbound fragments into complete messages.
///
/// Buffers live from the first fragment until completion or eviction.
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<String, ReassemblyBuffer>,
    max_pending: usize,
    max_fragments: u32,
    timeout: Duration,
}

impl Reassembler {
    /// Create a reassembler with explicit limits.
    pub fn new(max_pending: usize, max_fragments: u32, timeout: Duration) -> Self {
        Self {
            buffers: HashMap::new(),
            max_pending: max_pending.max(1),
            max_fragments,
            timeout,
        }
    }

    /// Create a reassembler from session configuration.
    pub fn from_config(config: &NetConfig) -> Self {
        Self::new(
            config.max_pending_reassemblies,
            config.max_fragments_per_message,
            config.reassembly_timeout,
        )
    }

    /// Number of incomplete messages.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Store a fragment; return the message bytes once all fragments arrived.
    pub fn on_fragment_bytes(
        &mut self,
        fragment: Fragment,
        now: Instant,
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        let Fragment {
            message_id,
            total_fragments: total,
            fragment_index: index,
            data,
        } = fragment;

        if total == 0 {
            return Err(FragmentError::EmptyMessage);
        }
        if total > self.max_fragments {
            return Err(FragmentError::TooManyFragments {
                total,
                max: self.max_fragments,
            });
        }
        if index >= total {
            return Err(FragmentError::IndexOutOfRange { index, total });
        }

        if !self.buffers.contains_key(&message_id) && self.buffers.len() >= self.max_pending {
            self.evict_oldest();
        }

        let buffer = self
            .buffers
            .entry(message_id.clone())
            .or_insert_with(|| ReassemblyBuffer {
                total,
                chunks: BTreeMap::new(),
                created: now,
            });

        if buffer.total != total {
            return Err(FragmentError::TotalMismatch {
                message_id,
                expected: buffer.total,
                actual: total,
            });
        }

        buffer.chunks.insert(index, data);
        trace!(message_id = %message_id, index, total, "stored fragment");

        if buffer.chunks.len() < total as usize {
            return Ok(None);
        }

        let Some(buffer) = self.buffers.remove(&message_id) else {
            return Ok(None);
        };
        let bytes = buffer.chunks.into_values().flatten().collect();
        Ok(Some(bytes))
    }

    /// Store a fragment; return the decoded message once complete.
    ///
    /// A completed message that fails to decode is dropped and reported.
    pub fn on_fragment(
        &mut self,
        fragment: Fragment,
        now: Instant,
    ) -> Result<Option<Message>, FragmentError> {
        match self.on_fragment_bytes(fragment, now)? {
            Some(bytes) => Ok(Some(Message::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop buffers older than the reassembly timeout.
    ///
    /// Returns the number of evicted buffers.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.buffers.len();
        self.buffers.retain(|message_id, buffer| {
            let keep = now.saturating_duration_since(buffer.created) < timeout;
            if !keep {
                warn!(
                    message_id = %message_id,
                    received = buffer.chunks.len(),
                    total = buffer.total,
                    "dropping incomplete message"
                );
            }
            keep
        });
        before - self.buffers.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|(_, buffer)| buffer.created)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!(message_id = %id, "reassembly buffer limit reached, evicting oldest");
            self.buffers.remove(&id);
        }
    }
}
