//! Per-process context handed to every tool call.
//!
//! A [`Session`] owns what a tool handler needs: the router (and through it
//! the identity, active peer and relay connection), the pending request
//! store, and the runtime settings. It is built once at startup and shared
//! behind an `Arc`; there are no globals.

use std::sync::Arc;

use crate::auth::{create_auth_token, relay_endpoint, DeviceType};
use crate::config::{PunchdownConfig, Settings};
use crate::device::{active_peer, DeviceIdentity};
use crate::error::RelayError;
use crate::relay::{
    ConnectionConfig, Connector, EndpointFn, MessageRouter, PendingRequests, RelayConnection,
};

/// Whether the session can reach a peer, and if not, why.
#[derive(Debug)]
pub enum Link {
    /// Connected (or reconnecting) to the relay with a paired peer.
    Ready(MessageRouter),
    /// No local identity has been created.
    NoIdentity,
    /// Identity exists but nothing is paired.
    NotPaired,
    /// Paired, but no usable relay URL.
    NoRelay,
}

/// Context object for tool calls.
#[derive(Debug)]
pub struct Session {
    link: Link,
    pending: Arc<PendingRequests>,
    settings: Settings,
}

impl Session {
    /// Assemble a session from parts.
    pub fn new(link: Link, pending: Arc<PendingRequests>, settings: Settings) -> Self {
        Self { link, pending, settings }
    }

    /// Build the session from the persisted config: when an identity, a
    /// paired peer and a relay URL are all present, start the relay
    /// connection and the router task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C: Connector>(
        config: &PunchdownConfig,
        settings: Settings,
        connector: C,
    ) -> Result<Self, RelayError> {
        let pending = PendingRequests::new();

        let Some(identity) = DeviceIdentity::from_config(config)? else {
            log::warn!("No device identity; relay not started");
            return Ok(Self::new(Link::NoIdentity, pending, settings));
        };
        let Some(peer) = active_peer(config)? else {
            log::info!("No paired device; relay not started");
            return Ok(Self::new(Link::NotPaired, pending, settings));
        };
        let Some(relay_url) = settings.relay_url.clone() else {
            log::warn!("No relay URL configured; relay not started");
            return Ok(Self::new(Link::NoRelay, pending, settings));
        };
        if let Err(e) = relay_endpoint(&relay_url, "") {
            log::error!("Relay URL {relay_url} is unusable: {e}");
            return Ok(Self::new(Link::NoRelay, pending, settings));
        }

        let identity = Arc::new(identity);
        log::info!(
            "Device {} ({}) paired with {} ({})",
            identity.device_id,
            identity.fingerprint(),
            peer.name,
            peer.id
        );

        let endpoint: EndpointFn = {
            let identity = Arc::clone(&identity);
            Arc::new(move || {
                let token =
                    create_auth_token(&identity.device_id, DeviceType::Desktop, &identity.signing_key)?;
                relay_endpoint(&relay_url, &token)
            })
        };
        let mut connection_config = ConnectionConfig::new(endpoint);
        connection_config.max_reconnect_attempts = settings.max_reconnect_attempts;
        connection_config.heartbeat_timeout = settings.heartbeat_timeout;

        let (connection, inbound) = RelayConnection::connect(connection_config, connector);
        let router = MessageRouter::new(identity, peer, connection, Arc::clone(&pending));
        tokio::spawn(router.clone().run(inbound));

        Ok(Self::new(Link::Ready(router), pending, settings))
    }

    /// Reachability of the peer.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// The router, when a peer is reachable.
    pub fn router(&self) -> Option<&MessageRouter> {
        match &self.link {
            Link::Ready(router) => Some(router),
            _ => None,
        }
    }

    /// Shared pending request store.
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Runtime settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop the relay session, if any. In-flight requests keep their own
    /// deadlines.
    pub async fn shutdown(&self) {
        if let Link::Ready(router) = &self.link {
            router.connection().disconnect().await;
        }
    }
}
