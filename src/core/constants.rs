//! Protocol constants and configuration defaults.
//!
//! Message kind strings are part of the wire format and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// MESSAGE KINDS
// =============================================================================

/// Heartbeat request sent by clients.
pub const KIND_PING_REQUEST: &str = "PING_REQUEST";

/// Heartbeat echo sent by the authority.
pub const KIND_PING_RESPONSE: &str = "PING_RESPONSE";

/// Entity creation broadcast.
pub const KIND_SPAWN_OBJECT: &str = "spawn_object";

/// Entity removal broadcast.
pub const KIND_REMOVE_OBJECT: &str = "remove_object";

/// Full scene listing sent in answer to a scene sync request.
pub const KIND_SCENE_SYNC: &str = "scene_sync";

/// Client asks for the full scene listing.
pub const KIND_REQUEST_SCENE_SYNC: &str = "request_scene_sync";

/// Client reports that it applied the scene listing.
pub const KIND_SCENE_SYNC_COMPLETE: &str = "scene_sync_complete";

/// Client asks for the spawn data of an entity it does not know.
pub const KIND_REQUEST_MISSING_OBJECT: &str = "request_missing_object";

/// Authority is going away.
pub const KIND_SERVER_SHUTDOWN: &str = "server_shutdown";

/// Slice of a larger message.
pub const KIND_FRAGMENT: &str = "fragment";

/// Suffix shared by every component sync message kind.
pub const UPDATE_KIND_SUFFIX: &str = "_update";

/// Keys every component update carries besides its fields.
pub const RESERVED_FIELD_NAMES: [&str; 2] = ["type", "network_id"];

// =============================================================================
// DATAGRAM SIZES
// =============================================================================

/// Default maximum datagram size accepted by the transport.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1200;

/// Bytes reserved for the fragment envelope around the base64 chunk.
pub const DEFAULT_FRAGMENT_HEADER_RESERVE: usize = 200;

/// Upper bound on `total_fragments` accepted from the wire.
pub const DEFAULT_MAX_FRAGMENTS_PER_MESSAGE: u32 = 1024;

/// Reassembly buffers kept open at once before the oldest is evicted.
pub const DEFAULT_MAX_PENDING_REASSEMBLIES: usize = 64;

// =============================================================================
// TIMING
// =============================================================================

/// Client heartbeat interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Time allowed in `Connecting` before the attempt fails (20 heartbeats).
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Silence tolerated on an established connection.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Weight of the newest sample in the latency EMA.
pub const DEFAULT_LATENCY_ALPHA: f64 = 0.2;

/// Interval between missing-object re-requests.
pub const DEFAULT_MISSING_OBJECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Re-requests sent for one missing object before giving up.
pub const DEFAULT_MISSING_OBJECT_MAX_ATTEMPTS: u32 = 30;

/// Scene sync request is re-sent after this long without an answer.
pub const DEFAULT_SCENE_SYNC_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Incomplete messages older than this are dropped.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep between transport polls in the receive loop.
pub const DEFAULT_RECV_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sleep between peer directory polls on the authority.
pub const DEFAULT_PEER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default interval between change checks of a sync component.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(50);

/// Removed ids remembered so late updates for them are not treated as missing.
pub const REMOVED_ID_MEMORY: usize = 4096;
