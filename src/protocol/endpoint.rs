//! Negotiated connection endpoints.
//!
//! A plugin announces where it listens in its handshake line as a
//! `NETWORK|ADDRESS` pair. Two networks are understood:
//!
//! - `tcp`: a loopback socket address such as `127.0.0.1:43121`.
//! - `unix`: a local socket name, served through the `interprocess` crate
//!   (a Unix domain socket on Linux/macOS, a named pipe on Windows).
//!
//! Every RPC stream is a fresh connection to the endpoint, framed with
//! [`FrameCodec`] in both directions.

use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use interprocess::local_socket::tokio::{Listener as LocalListener, Stream as LocalStream};
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::protocol::codec::FrameCodec;
use crate::{AppError, Result};

/// A bidirectional byte transport carrying one RPC stream.
pub trait PluginIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> PluginIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed transport returned by [`Endpoint::connect`] and [`PluginListener::accept`].
pub type BoxedIo = Box<dyn PluginIo>;

/// Inbound half of a framed stream.
pub type FrameReader = FramedRead<ReadHalf<BoxedIo>, FrameCodec>;

/// Outbound half of a framed stream.
pub type FrameWriter = FramedWrite<WriteHalf<BoxedIo>, FrameCodec>;

/// Split a transport into independently owned framed halves.
#[must_use]
pub fn framed(io: BoxedIo) -> (FrameReader, FrameWriter) {
    let (read, write) = tokio::io::split(io);
    (
        FramedRead::new(read, FrameCodec::new()),
        FramedWrite::new(write, FrameCodec::new()),
    )
}

/// Address a plugin listens on, as announced in its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Loopback TCP socket.
    Tcp(SocketAddr),
    /// Local socket name (Unix domain socket or named pipe).
    Local(String),
}

impl Endpoint {
    /// Parse the `NETWORK` and `ADDRESS` fields of a handshake line.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::IncompatiblePlugin`] for an unknown network or an
    /// address that does not parse for that network.
    pub fn parse(network: &str, address: &str) -> Result<Self> {
        match network {
            "tcp" => address.parse::<SocketAddr>().map(Self::Tcp).map_err(|e| {
                AppError::IncompatiblePlugin(format!("invalid tcp address '{address}': {e}"))
            }),
            "unix" if !address.trim().is_empty() => Ok(Self::Local(address.to_owned())),
            "unix" => Err(AppError::IncompatiblePlugin(
                "empty local socket name in handshake".into(),
            )),
            other => Err(AppError::IncompatiblePlugin(format!(
                "unsupported network type '{other}'"
            ))),
        }
    }

    /// Network name as written in the handshake line.
    #[must_use]
    pub fn network(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Local(_) => "unix",
        }
    }

    /// Address as written in the handshake line.
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Tcp(addr) => addr.to_string(),
            Self::Local(name) => name.clone(),
        }
    }

    /// Open a new transport connection to this endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Stream`] if the dial fails.
    pub async fn connect(&self) -> Result<BoxedIo> {
        match self {
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| AppError::Stream(format!("failed to dial {self}: {e}")))?;
                stream.set_nodelay(true).ok();
                Ok(Box::new(stream))
            }
            Self::Local(name) => {
                let ns_name = name
                    .clone()
                    .to_ns_name::<GenericNamespaced>()
                    .map_err(|e| AppError::Stream(format!("invalid local socket name: {e}")))?;
                let stream = LocalStream::connect(ns_name)
                    .await
                    .map_err(|e| AppError::Stream(format!("failed to dial {self}: {e}")))?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.network(), self.address())
    }
}

/// Plugin-side listener bound to an [`Endpoint`].
pub enum PluginListener {
    /// Loopback TCP listener.
    Tcp(TcpListener),
    /// Local socket listener.
    Local(LocalListener),
}

impl PluginListener {
    /// Bind a TCP listener on an ephemeral loopback port.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the bind fails.
    pub async fn bind_tcp() -> Result<(Self, Endpoint)> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        Ok((Self::Tcp(listener), Endpoint::Tcp(addr)))
    }

    /// Bind a local socket listener under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the name is invalid or the bind fails.
    pub fn bind_local(name: &str) -> Result<(Self, Endpoint)> {
        let ns_name = name
            .to_owned()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|e| AppError::Io(format!("invalid local socket name '{name}': {e}")))?;
        let listener = ListenerOptions::new()
            .name(ns_name)
            .create_tokio()
            .map_err(|e| AppError::Io(format!("failed to create local listener: {e}")))?;
        Ok((Self::Local(listener), Endpoint::Local(name.to_owned())))
    }

    /// Accept the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the accept fails.
    pub async fn accept(&self) -> Result<BoxedIo> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _peer) = listener.accept().await?;
                stream.set_nodelay(true).ok();
                Ok(Box::new(stream))
            }
            Self::Local(listener) => {
                let stream = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}
