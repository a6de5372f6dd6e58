//! Core traits for the alert gateway
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`MessagingGateway`]: Deliver alert text and receive operator commands
//! - [`RegistryStore`]: Durable recipient set and device name registry

pub mod gateway;
pub mod registry_store;

pub use gateway::{
    ConnectionUpdate, DisconnectReason, GatewayEvent, InboundMessage, MessagingGateway,
    MessagingGatewayFactory,
};
pub use registry_store::{Membership, NameChange, RegistryStore, RegistryStoreFactory};
