//! Plugin registry and dispense.
//!
//! A [`PluginRegistry`] maps a plugin-type name to a factory that turns an
//! established [`PluginConnection`] into a statically typed client. The
//! registry is populated once at start-up and only read afterwards.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::CliClient;
use crate::protocol::endpoint::{framed, Endpoint, FrameReader, FrameWriter};
use crate::{AppError, Result};

/// Plugin type served by CLI subcommand plugins.
pub const CLI_PLUGIN_TYPE: &str = "cli_plugin";

/// Handle to the RPC channel of one running plugin.
///
/// Cloning is cheap; every clone observes the same closed state. Once the
/// owning process supervisor closes the connection, every clone refuses to
/// open new streams and in-flight streams are told to stop.
#[derive(Debug, Clone)]
pub struct PluginConnection {
    endpoint: Endpoint,
    closed: CancellationToken,
}

impl PluginConnection {
    /// Wrap an endpoint negotiated by the handshake.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            closed: CancellationToken::new(),
        }
    }

    /// Endpoint the plugin listens on.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open a new framed RPC stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Stream`] if the connection is closed or the dial
    /// fails.
    pub async fn open_stream(&self) -> Result<(FrameReader, FrameWriter)> {
        if self.is_closed() {
            return Err(AppError::Stream("connection closed".into()));
        }

        let io = tokio::select! {
            biased;
            () = self.closed.cancelled() => {
                return Err(AppError::Stream("connection closed".into()));
            }
            io = self.endpoint.connect() => io?,
        };

        debug!(endpoint = %self.endpoint, "rpc stream opened");
        Ok(framed(io))
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close the connection for every clone. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Factory producing a typed client from a connection.
pub type PluginFactory<T> = Arc<dyn Fn(PluginConnection) -> Result<T> + Send + Sync>;

/// Mapping from plugin-type name to typed client factory.
pub struct PluginRegistry<T> {
    factories: HashMap<String, PluginFactory<T>>,
}

impl<T> PluginRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` under `plugin_type`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if `plugin_type` is already registered.
    pub fn register<F>(&mut self, plugin_type: &str, factory: F) -> Result<()>
    where
        F: Fn(PluginConnection) -> Result<T> + Send + Sync + 'static,
    {
        if self.factories.contains_key(plugin_type) {
            return Err(AppError::Config(format!(
                "plugin type '{plugin_type}' is already registered"
            )));
        }
        self.factories
            .insert(plugin_type.to_owned(), Arc::new(factory));
        Ok(())
    }

    /// Whether `plugin_type` has a registered factory.
    #[must_use]
    pub fn contains(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    /// Registered plugin-type names, sorted.
    #[must_use]
    pub fn plugin_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Produce a typed client for `plugin_type` bound to `connection`.
    ///
    /// # Errors
    ///
    /// - [`AppError::UnknownPluginType`] if nothing is registered under
    ///   `plugin_type`.
    /// - Any error returned by the factory.
    pub fn dispense(&self, plugin_type: &str, connection: PluginConnection) -> Result<T> {
        let factory = self.factories.get(plugin_type).ok_or_else(|| {
            AppError::UnknownPluginType(format!("no plugin registered as '{plugin_type}'"))
        })?;
        debug!(plugin_type, endpoint = %connection.endpoint(), "dispensing plugin client");
        factory(connection)
    }
}

impl<T> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PluginRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_types", &self.plugin_types())
            .finish()
    }
}

/// Process-wide registry of CLI plugin clients.
///
/// Holds a single entry, [`CLI_PLUGIN_TYPE`] → [`CliClient`], created on
/// first use and never mutated afterwards.
#[must_use]
pub fn cli_plugin_registry() -> &'static PluginRegistry<CliClient> {
    static REGISTRY: OnceLock<PluginRegistry<CliClient>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = PluginRegistry::new();
        let factory: PluginFactory<CliClient> = Arc::new(|conn| Ok(CliClient::new(conn)));
        registry.factories.insert(CLI_PLUGIN_TYPE.to_owned(), factory);
        registry
    })
}
