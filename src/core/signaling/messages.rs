//! Signaling relay message types.
//!
//! The relay speaks JSON objects with an `action` field selecting the
//! payload shape:
//!
//! - `connect` - register this client on a signaling channel
//! - `offer` / `answer` - SDP exchange
//! - `ice-candidate` - trickle ICE candidate
//!
//! The same shapes are used in both directions; inbound frames that do not
//! parse are dropped by the client, never fatal to the connection.

use serde::{Deserialize, Serialize};

/// A message on the signaling channel, tagged by `action`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action")]
pub enum SignalingMessage {
    /// Register this client on a channel. Sent once after the socket opens;
    /// the relay acknowledges with the same action.
    #[serde(rename = "connect")]
    Connect {
        /// Channel identifier (resource name) on the relay
        #[serde(rename = "channelARN")]
        channel_arn: String,
        /// Client identifier within the channel
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Session description offer.
    #[serde(rename = "offer")]
    Offer {
        /// SDP payload
        sdp: String,
    },

    /// Session description answer.
    #[serde(rename = "answer")]
    Answer {
        /// SDP payload
        sdp: String,
    },

    /// Trickle ICE candidate.
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        /// Candidate string as produced by the peer
        candidate: String,
    },
}

/// Typed events surfaced by the [`SignalingClient`](super::SignalingClient)
/// read loop.
///
/// `Closed` is terminal and emitted exactly once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// The relay acknowledged our `connect` message.
    ConnectAck,
    /// Remote offer arrived.
    Offer(String),
    /// Remote answer arrived.
    Answer(String),
    /// Remote ICE candidate arrived.
    IceCandidate(String),
    /// The connection closed (server close frame, EOF, or read error after
    /// which no further events follow).
    Closed,
    /// A connection-level error. The read loop keeps running unless the
    /// transport itself died, in which case `Closed` follows.
    Error(String),
}
