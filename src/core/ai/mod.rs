//! Speech-AI event-stream session.
//!
//! One [`AiSession`] per bridged call: a strict control sequence on the
//! outbound side (session → prompt → system instructions → audio content →
//! frames → ordered teardown) and a typed, handler-dispatched event feed on
//! the inbound side. The transport behind it is a seam ([`AiTransport`]) so
//! the state machine is testable without a network.

mod error;
mod messages;
mod session;
mod state;
mod transport;

pub use error::AiError;
pub use messages::{
    AiEventKind, ClientEvent, ContentRole, ContentType, ErrorSeverity, ServerEvent,
};
pub use session::{AiEventCallback, AiSession};
pub use state::{AiSessionState, ControlCall, ProtocolSequenceError};
pub use transport::{AiTransport, ChannelTransport, WsTransport};
