// # dioalert-core
//
// Core library for the device alert gateway.
//
// ## Architecture Overview
//
// Field devices report digital-input changes over TCP and UDP. This library
// turns those reports into alerts for a managed recipient list:
// - **wire**: Decodes a raw frame into a device event
// - **InputStateTracker**: Debounces repeated reports per device and input
// - **format**: Renders the two-line alert text
// - **Dispatcher**: Paced, failure-isolated broadcast over the gateway
// - **CommandInterpreter**: Operator commands that edit the registries
// - **MessagingGateway**: Trait for the alert delivery transport
// - **RegistryStore**: Trait for the durable recipient set and device names
// - **AlertEngine**: Wires listeners, pipeline, gateway supervisor and commands
// - **GatewayRegistry**: Plugin-based registry for gateways and stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from gateway implementations
// 2. **Explicit State**: Shared state sits behind narrow, lock-guarded contracts
// 3. **Plugin-Based**: Gateways and stores are registered dynamically
// 4. **Library-First**: Everything the daemon does can be embedded

pub mod address;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod format;
pub mod listener;
pub mod registry;
pub mod state;
pub mod tracker;
pub mod traits;
pub mod wire;

// Re-export core types for convenience
pub use address::AddressFormat;
pub use command::{Command, CommandInterpreter};
pub use config::{AlertConfig, GatewayProviderConfig, InputLabels, RegistryConfig};
pub use dispatch::{BroadcastReport, Dispatcher};
pub use engine::{AlertEngine, AlertPipeline, ConnectionState, EngineEvent};
pub use error::{Error, Result};
pub use registry::GatewayRegistry;
pub use state::{FileRegistryStore, MemoryRegistryStore};
pub use tracker::{InputStateTracker, StateChange};
pub use traits::{MessagingGateway, RegistryStore};
pub use wire::{DeviceEvent, InputId};
