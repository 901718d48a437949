//! Hearth Bus - Typed publish/subscribe between the hub and plugin processes
//!
//! The bus maps logical [`EventType`]s to topic strings, JSON-encodes payloads
//! and hands them to a [`Transport`]. Delivery is fire-and-forget: a successful
//! publish only means the local transport accepted the message.
//!
//! Two transports are provided:
//! - [`MemoryTransport`] - in-process, backed by a [`TopicRouter`]
//! - [`TcpTransport`] - a client of a [`TcpBroker`] hosted by the hub

mod bus;
mod error;
mod router;
mod topic;
pub mod transport;

pub use bus::*;
pub use error::*;
pub use router::*;
pub use topic::*;
pub use transport::{Message, MemoryTransport, Subscription, TcpBroker, TcpTransport, Transport};
