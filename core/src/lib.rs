//! Asynchronous HTTP and WebSocket client core.
//!
//! # Overview
//! Describes HTTP requests as plain data (`Request` builds an `HttpRequest`),
//! executes them through a pluggable `Transport` and evaluates the
//! `HttpResponse` against an acceptable status range and an optional typed
//! error model. Work can be wrapped in cancellable operations and routed
//! through a `Dispatcher` onto sequential, concurrent or named queues, with
//! every completion delivered on one callback context. A `SocketManager`
//! keeps named WebSocket channels and pings them while more than one is open.
//!
//! # Design
//! - `Client` carries no state between calls beyond its transport and
//!   default timeout; the I/O boundary is the `Transport` trait.
//! - `evaluate`, `decode` and `Request::build` are pure and testable without
//!   a network.
//! - `Courier` bundles the client, dispatcher and socket manager as one
//!   explicit context instead of process-wide globals.
//! - Every failure is reported once through a typed error; nothing retries.

pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod operation;
pub mod queue;
pub mod request;
pub mod socket;
pub mod transport;

pub use client::{cast_json, decode, evaluate, Client};
pub use config::Config;
pub use context::Courier;
pub use dispatcher::{Dispatcher, QueueSelector};
pub use error::{ApiError, ConfigError, DispatchError, ErrorModel, NoErrorModel, SocketError, TransportError};
pub use http::{AuthScheme, ContentType, HttpMethod, HttpRequest, HttpResponse};
pub use operation::{CallbackContext, Operation, OperationHandle, OperationState, OperationStatus, Outcome};
pub use queue::WorkQueue;
pub use request::{Request, DEFAULT_ACCEPTABLE_STATUS};
pub use socket::{SocketManager, SocketMessage};
pub use transport::{ReqwestTransport, Transport};
