//! Client side of the live speech service
//!
//! - `messages`: JSON wire types
//! - `transport`: link abstraction, WebSocket link, and the handshake-gated
//!   outbound queue
//! - `router`: inbound message fan-out

pub mod messages;
pub mod router;
pub mod transport;

pub use messages::{ClientMessage, FunctionCall, FunctionResponse, ServerMessage, SetupMessage};
pub use router::MessageRouter;
pub use transport::{
    Handshake, LinkEvent, LiveConnector, LiveLink, OutboundSender, SendOutcome, SessionTransport,
    TransportEvent, TransportStreams, WebSocketConnector,
};
