//! Client-server message protocol.
//!
//! This module defines the messages exchanged between a catalink client and a catalog server
//! and the framing that carries them over a [`Channel`](crate::transport::Channel). The framing
//! layer only moves exact byte counts; it never interprets message bodies beyond decoding them.
//!
//! # Binary Format
//!
//! Every message travels as one frame:
//!
//! - A 4-byte big-endian body length.
//! - The body: a [`Request`] or [`Response`] encoded with bincode (big-endian, fixed-width
//!   integers).
//!
//! Bodies larger than [`MAX_MESSAGE_LEN`] are rejected on both ends.
//!
//! # Key Components
//!
//! - [`Request`]: messages sent by the client (negotiation, authentication, TLS control).
//! - [`Response`]: messages sent back by the server.
//! - [`write_message`] / [`read_message`]: framing over the reliable byte transport.
//!
//! # See Also
//!
//! - [`transport`](crate::transport): the byte-exact read/write loops used underneath.
//! - [`session`](crate::session): routes frames through the plain or secure channel.
mod frame;
mod request;
mod response;

pub use frame::{MAX_MESSAGE_LEN, read_message, write_message};
pub use request::Request;
pub use response::Response;
