//! Configuration types for the alert gateway
//!
//! This module defines all configuration structures used throughout the crate.

use crate::address::{AddressFormat, is_valid_local_number};
use crate::wire::InputId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Acknowledgement written back to stream clients after each frame
pub const DEFAULT_ACK_TOKEN: &str = "+SACK:GTACK,0,0$";

/// Main alert gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Device ingestion listeners (TCP + UDP)
    #[serde(default)]
    pub listener: ListenerConfig,

    /// The operator identity (authorized for commands, default recipient)
    pub operator: OperatorConfig,

    /// Registry store configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Alert dispatch settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Messaging gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Human-readable label per monitored input
    #[serde(default)]
    pub inputs: InputLabels,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AlertConfig {
    /// Create a configuration with defaults for the given operator number
    pub fn new(operator_phone: impl Into<String>) -> Self {
        Self {
            operator: OperatorConfig {
                phone: operator_phone.into(),
                ..OperatorConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.listener.validate()?;
        self.operator.validate()?;
        self.gateway.validate()?;
        Ok(())
    }
}

/// Listener configuration (shared by TCP and UDP)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind (e.g., "0.0.0.0")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Port to bind; both protocols use the same value
    #[serde(default = "default_port")]
    pub port: u16,

    /// Token written back after each stream frame
    #[serde(default = "default_ack_token")]
    pub ack_token: String,

    /// Longest partial record kept while waiting for a terminator
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl ListenerConfig {
    /// `host:port` string for binding
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Validate the listener configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.bind_addr.trim().is_empty() {
            return Err(crate::Error::config("Listener bind address cannot be empty"));
        }
        if self.max_frame_len == 0 {
            return Err(crate::Error::config("Listener max frame length must be > 0"));
        }
        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            ack_token: default_ack_token(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6000
}

fn default_ack_token() -> String {
    DEFAULT_ACK_TOKEN.to_string()
}

fn default_max_frame_len() -> usize {
    4096
}

/// Operator identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Local number of the operator (without country code)
    pub phone: String,

    /// Country code prepended to local numbers
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Gateway-specific address domain
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl OperatorConfig {
    /// Address format derived from this operator's country code and domain
    pub fn address_format(&self) -> AddressFormat {
        AddressFormat::new(self.country_code.clone(), self.domain.clone())
    }

    /// Full gateway address of the operator
    pub fn address(&self) -> String {
        self.address_format().normalize(&self.phone)
    }

    /// Validate the operator configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !is_valid_local_number(&self.phone) {
            return Err(crate::Error::config(format!(
                "Operator phone must be 7-12 digits, got '{}'",
                self.phone
            )));
        }
        if self.country_code.is_empty() || !self.country_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::Error::config(format!(
                "Country code must be numeric, got '{}'",
                self.country_code
            )));
        }
        if self.domain.trim().is_empty() || self.domain.contains('@') {
            return Err(crate::Error::config(format!(
                "Address domain is invalid: '{}'",
                self.domain
            )));
        }
        Ok(())
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            phone: String::new(),
            country_code: default_country_code(),
            domain: default_domain(),
        }
    }
}

fn default_country_code() -> String {
    "549".to_string()
}

fn default_domain() -> String {
    "s.whatsapp.net".to_string()
}

/// Registry store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryConfig {
    /// JSON documents on disk
    File {
        /// Recipient short-form number list
        recipients_path: String,
        /// Device id → display name mapping
        names_path: String,
    },

    /// In-memory registry (not persistent)
    Memory,
}

impl RegistryConfig {
    /// Get the registry store type name
    pub fn type_name(&self) -> &str {
        match self {
            RegistryConfig::File { .. } => "file",
            RegistryConfig::Memory => "memory",
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig::File {
            recipients_path: "./numeros_notif.json".to_string(),
            names_path: "./nombres_imei.json".to_string(),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Delay between consecutive sends of one broadcast (milliseconds)
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl DispatcherConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
        }
    }
}

fn default_pacing_ms() -> u64 {
    800
}

/// Messaging gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Which gateway implementation to use
    pub provider: GatewayProviderConfig,

    /// Delay before reconnecting after an unexpected disconnect (seconds)
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Notify the operator when the gateway connection opens
    #[serde(default = "default_startup_notice")]
    pub startup_notice: bool,

    /// Delay between connection open and the startup notice (milliseconds)
    #[serde(default = "default_startup_notice_delay_ms")]
    pub startup_notice_delay_ms: u64,
}

impl GatewayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn startup_notice_delay(&self) -> Duration {
        Duration::from_millis(self.startup_notice_delay_ms)
    }

    /// Validate the gateway configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProviderConfig::default(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            startup_notice: default_startup_notice(),
            startup_notice_delay_ms: default_startup_notice_delay_ms(),
        }
    }
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_startup_notice() -> bool {
    true
}

fn default_startup_notice_delay_ms() -> u64 {
    3000
}

/// Gateway implementation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayProviderConfig {
    /// HTTP messaging bridge
    Http {
        /// Bridge base URL (e.g., "http://127.0.0.1:3000")
        base_url: String,
        /// Bearer token for the bridge API
        api_token: String,
        /// Inbound message poll interval (milliseconds)
        poll_interval_ms: u64,
    },

    /// Custom gateway
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl GatewayProviderConfig {
    /// Validate the gateway provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            GatewayProviderConfig::Http {
                base_url,
                poll_interval_ms,
                ..
            } => {
                if base_url.is_empty() {
                    return Err(crate::Error::config("HTTP gateway base URL cannot be empty"));
                }
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                    return Err(crate::Error::config(format!(
                        "HTTP gateway base URL must use http or https: {}",
                        base_url
                    )));
                }
                if *poll_interval_ms == 0 {
                    return Err(crate::Error::config("HTTP gateway poll interval must be > 0"));
                }
                Ok(())
            }
            GatewayProviderConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom gateway factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the gateway type name
    pub fn type_name(&self) -> &str {
        match self {
            GatewayProviderConfig::Http { .. } => "http",
            GatewayProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for GatewayProviderConfig {
    fn default() -> Self {
        GatewayProviderConfig::Http {
            base_url: "http://127.0.0.1:3000".to_string(),
            api_token: String::new(),
            poll_interval_ms: 2000,
        }
    }
}

/// Human-readable labels for the monitored inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputLabels(BTreeMap<InputId, String>);

impl InputLabels {
    /// Labels with no entries (every input falls back to its raw id)
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Set the label of one input
    pub fn with_label(mut self, input: InputId, label: impl Into<String>) -> Self {
        self.0.insert(input, label.into());
        self
    }

    /// Label of an input, or its raw identifier when unmapped
    pub fn label(&self, input: InputId) -> &str {
        self.0
            .get(&input)
            .map(String::as_str)
            .unwrap_or_else(|| input.as_str())
    }

    /// Parse `in1=Tamper,in2=Safe` style overrides on top of `self`
    pub fn parse_overrides(mut self, overrides: &str) -> Result<Self, crate::Error> {
        for entry in overrides.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (input, label) = entry.split_once('=').ok_or_else(|| {
                crate::Error::config(format!("Input label '{}' must look like in1=Label", entry))
            })?;
            let input: InputId = input.parse()?;
            let label = label.trim();
            if label.is_empty() {
                return Err(crate::Error::config(format!("Label for {} cannot be empty", input)));
            }
            self.0.insert(input, label.to_string());
        }
        Ok(self)
    }
}

impl Default for InputLabels {
    fn default() -> Self {
        Self::empty()
            .with_label(InputId::In1, "Tamper")
            .with_label(InputId::In2, "Safe")
            .with_label(InputId::In3, "Server room")
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Capacity of the queue between the gateway and the command task
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_command_queue_capacity() -> usize {
    64
}
