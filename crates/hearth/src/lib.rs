//! Hearth - home automation hub
//!
//! This crate provides the hub side of the system:
//! - Plugin registry and lifecycle control over the event bus
//! - The device state pipeline (kernel)
//! - Device persistence (in memory or redb)
//! - Protocol decoders for raw readings
//! - Configuration and hub assembly for the `hearth` binary

pub mod config;
pub mod hub;
pub mod kernel;
pub mod protocol;
pub mod registry;
pub mod repository;

pub use config::{HubConfig, load_config};
pub use hub::Hub;
