//! Plugin wire protocol.
//!
//! - `codec`: newline-delimited frame codec with a 1 MiB frame cap.
//! - `wire`: the frame shapes exchanged on an RPC stream.
//! - `handshake`: the magic-cookie and version negotiation performed once per
//!   launch.
//! - `endpoint`: the negotiated address plus dial/listen helpers.
//!
//! The handshake line is `CORE|APP|NETWORK|ADDRESS|ndjson|COOKIE`. It is
//! not compatible with HashiCorp go-plugin, whose line ends in `grpc` and
//! whose optional sixth field is a TLS certificate rather than the cookie.
//! Plugins built against go-plugin cannot be hosted, and this host's
//! plugins cannot be loaded by a go-plugin host.

pub mod codec;
pub mod endpoint;
pub mod handshake;
pub mod wire;
