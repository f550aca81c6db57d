//! Signaling channel client.
//!
//! Out-of-band relay used to exchange session descriptions and ICE
//! candidates before media flows peer-to-peer. One WebSocket connection per
//! call, owned by [`SignalingClient`]; inbound traffic surfaces as a typed
//! [`SignalingEvent`] feed.

mod client;
mod messages;

pub use client::{SignalingClient, SignalingError};
pub use messages::{SignalingEvent, SignalingMessage};
