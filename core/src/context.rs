//! The `Courier` context: one client, one dispatcher, one socket manager.

use serde::de::DeserializeOwned;

use crate::client::Client;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, QueueSelector};
use crate::error::{ApiError, ErrorModel, TransportError};
use crate::operation::OperationHandle;
use crate::request::Request;
use crate::socket::SocketManager;

/// Shared networking context built once from a `Config` and handed to the
/// code that needs it.
#[derive(Debug)]
pub struct Courier {
    config: Config,
    client: Client,
    dispatcher: Dispatcher,
    sockets: SocketManager,
}

impl Courier {
    /// Build the context over the `reqwest` transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: Config) -> Result<Self, TransportError> {
        let client = Client::from_config(&config)?;
        Ok(Self::with_client(config, client))
    }

    /// Build the context around an existing client.
    pub fn with_client(config: Config, client: Client) -> Self {
        let sockets = SocketManager::new(config.ping_interval);
        Self {
            config,
            client,
            dispatcher: Dispatcher::new(),
            sockets,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sockets(&self) -> &SocketManager {
        &self.sockets
    }

    /// Queue a `fetch` of `request` on the selected dispatcher queue.
    pub fn fetch_on<D, E>(
        &self,
        selector: QueueSelector,
        label: impl Into<String>,
        request: Request<E>,
    ) -> OperationHandle<D, ApiError<E>>
    where
        D: DeserializeOwned + Send + 'static,
        E: ErrorModel,
    {
        let (op, handle) = self.client.fetch_operation(label, request);
        self.dispatcher.submit(op, selector);
        handle
    }
}
