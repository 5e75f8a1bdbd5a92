//! Error types for netweave.

use std::time::Duration;

use thiserror::Error;

use super::ids::{NetworkId, PeerId};

/// Errors that can occur when decoding a wire message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Payload is JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// The mandatory `type` discriminator is absent or not a string.
    #[error("message has no string `type` field")]
    MissingType,

    /// A known message kind carried malformed fields.
    #[error("invalid `{kind}` message: {reason}")]
    InvalidFields {
        /// Message kind.
        kind: String,
        /// What was wrong.
        reason: String,
    },

    /// Fragment data is not valid base64.
    #[error("invalid base64 fragment data: {0}")]
    InvalidBase64(String),
}

/// Errors that can occur when encoding a wire message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Serialization failed.
    #[error("json encoding failed: {0}")]
    Json(String),
}

/// Errors raised by the fragmenter and reassembler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// `total_fragments` was zero.
    #[error("fragment declares zero total fragments")]
    EmptyMessage,

    /// `fragment_index` outside `0..total_fragments`.
    #[error("fragment index {index} out of range (total {total})")]
    IndexOutOfRange {
        /// Received index.
        index: u32,
        /// Declared total.
        total: u32,
    },

    /// `total_fragments` above the configured cap.
    #[error("fragment count {total} exceeds limit {max}")]
    TooManyFragments {
        /// Declared total.
        total: u32,
        /// Configured cap.
        max: u32,
    },

    /// A fragment disagrees with earlier fragments of the same message.
    #[error("fragment total mismatch for {message_id}: expected {expected}, got {actual}")]
    TotalMismatch {
        /// Message token.
        message_id: String,
        /// Total recorded from the first fragment.
        expected: u32,
        /// Total on this fragment.
        actual: u32,
    },

    /// Datagram budget leaves no room for payload.
    #[error("datagram size {max_datagram} leaves no room after {header_reserve} header bytes")]
    NoPayloadRoom {
        /// Configured datagram size.
        max_datagram: usize,
        /// Reserved header bytes.
        header_reserve: usize,
    },

    /// The transport refused a fragment.
    #[error("transport refused fragment {index} for peer {peer}")]
    SendFailed {
        /// Destination.
        peer: PeerId,
        /// Fragment index that failed.
        index: u32,
    },

    /// Encoding a fragment or the message failed.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The reassembled bytes did not decode.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Connection lifecycle failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No heartbeat response arrived while connecting.
    #[error("handshake timed out after {waited:?}")]
    HandshakeTimeout {
        /// Time spent connecting.
        waited: Duration,
    },

    /// An established connection went silent.
    #[error("connection timed out after {silent:?} without contact")]
    TimedOut {
        /// Time since last contact.
        silent: Duration,
    },

    /// The authority announced shutdown.
    #[error("server shut down")]
    ServerShutdown,

    /// Operation on a connection that is already disconnected.
    #[error("connection closed")]
    Closed,
}

/// Errors that can occur when applying a received value to a field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The value did not match the field's type.
    #[error("invalid value for field `{field}`: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Deserialization failure.
        reason: String,
    },
}

/// Errors in declaring sync components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Field name collides with an envelope key.
    #[error("field name `{0}` is reserved")]
    ReservedFieldName(String),

    /// Same field declared twice on one component.
    #[error("field `{0}` declared twice")]
    DuplicateField(String),

    /// Sync type does not end in `_update`.
    #[error("sync type `{0}` must end with `_update`")]
    InvalidSyncType(String),
}

/// Errors from the entity registry and factory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// No constructor registered under this type name.
    #[error("unknown entity type `{0}`")]
    UnknownType(String),

    /// An entity with this id is already registered.
    #[error("network id {0} already registered")]
    DuplicateId(NetworkId),

    /// A constructor failed to declare its components.
    #[error("entity construction failed: {0}")]
    Construction(#[from] SyncError),

    /// Only the authority may create or remove networked entities.
    #[error("operation requires server authority")]
    NotAuthority,
}

/// Errors from [`NetConfig::validate`](super::NetConfig::validate).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Datagrams leave no room for fragment payload after the header reserve.
    #[error("max_datagram_size {max_datagram} too small for header reserve {reserve}")]
    DatagramTooSmall {
        /// Configured datagram size.
        max_datagram: usize,
        /// Configured header reserve.
        reserve: usize,
    },

    /// EMA weight outside `(0, 1]`.
    #[error("latency_alpha {0} outside (0, 1]")]
    LatencyAlpha(f64),

    /// Fragment or pending-buffer limit of zero.
    #[error("reassembly limits must be non-zero")]
    ZeroReassemblyLimit,

    /// Ping or retry interval of zero.
    #[error("intervals must be non-zero")]
    ZeroInterval,

    /// Handshake would time out before a single ping went out.
    #[error("handshake_timeout shorter than one ping interval")]
    HandshakeTooShort,

    /// A connected client would time out between two pings.
    #[error("disconnect_timeout must exceed the ping interval")]
    DisconnectTooShort,
}

/// Top-level netweave errors.
#[derive(Debug, Error)]
pub enum NetError {
    /// Decode error.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Encode error.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Fragmentation error.
    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Sync declaration error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Entity error.
    #[error("world error: {0}")]
    World(#[from] WorldError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport refused a datagram.
    #[error("transport refused datagram for peer {0}")]
    SendFailed(PeerId),

    /// Transport failed to initialize.
    #[error("transport initialization failed")]
    TransportInit,

    /// Operation not available to this endpoint's role.
    #[error("operation requires the {0} role")]
    WrongRole(&'static str),

    /// The session side of the inbound queue is gone.
    #[error("inbound queue closed")]
    QueueClosed,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, NetError>;
