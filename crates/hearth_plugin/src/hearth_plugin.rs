//! Hearth Plugin - Runtime client linked into every plugin process
//!
//! A plugin implements [`PluginHooks`] and hands them to
//! [`PluginClient::run`], which announces the plugin to the hub, turns
//! start/stop commands into hook calls answered with ack/nack, and announces
//! the disconnect when the process is asked to shut down.
//!
//! ```ignore
//! let shutdown = hearth_plugin::shutdown_token();
//! let client = PluginClient::connect("127.0.0.1:1883", Plugin::scanner("ble", "BLE Scanner")).await?;
//! client.run(MyScanner::new(client.state_reporter()), shutdown).await?;
//! ```

mod client;
mod error;
mod shutdown;

pub use client::*;
pub use error::*;
pub use shutdown::*;
