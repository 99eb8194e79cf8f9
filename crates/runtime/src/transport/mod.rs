//! Transport adapters (§4.8): stdio, streamable HTTP, WebSocket, and legacy
//! SSE+POST all front the same `Dispatcher`; none of them carry protocol
//! logic of their own beyond framing and session bookkeeping.

pub mod sessions;
pub mod stdio;

#[cfg(feature = "http-api")]
pub mod http;

pub use sessions::SessionStore;

#[cfg(feature = "http-api")]
pub use http::{router, TransportState};
