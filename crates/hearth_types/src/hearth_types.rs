//! Hearth Types - Shared data model for the hub and its plugins
//!
//! Everything in this crate travels over the event bus as JSON, so the
//! serde attributes here define the wire format seen by every plugin process.

mod capability;
mod device;
mod plugin;

pub use capability::*;
pub use device::*;
pub use plugin::*;
