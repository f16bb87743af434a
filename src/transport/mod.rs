//! Session transport
//!
//! Owns the persistent duplex socket and the event protocol on top of it.
//! Capture and playback never touch the socket directly; they see only the
//! [`TransportSender`] emit surface and decoded inbound events.

pub mod client;
pub mod messages;

pub use client::{
    send_termination, StreamTransport, TransportConfig, TransportSender, TransportUpdate,
};
pub use messages::{
    encode_extra_data, CallTermination, CallTerminationPayload, ClientEvent, MediaPayload,
    ServerEvent, StartPayload,
};
