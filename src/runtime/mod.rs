//! netweave - Runtime
//!
//! Tokio tasks that keep a session fed: receive, heartbeat, peer
//! bookkeeping and retry ticks. The host keeps calling
//! [`NetSession::tick`](crate::session::NetSession::tick) on its own thread.

mod driver;

pub use driver::*;
