//! Operator command interpreter
//!
//! The messaging channel doubles as an administrative control plane. Only
//! messages from the operator address are considered; everything else is
//! dropped without a reply.
//!
//! | Command                  | Effect                               |
//! |--------------------------|--------------------------------------|
//! | `+admin <digits>`        | add a recipient (7-12 digits)        |
//! | `-admin <digits>`        | remove a recipient                   |
//! | `lista`                  | list recipients (short form)         |
//! | `+nombre <id> <name...>` | assign a display name to a device    |
//! | `-nombre <id>`           | remove a device's display name       |
//! | `nombres`                | list registered device names         |

use crate::address::{AddressFormat, is_valid_local_number};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::traits::{InboundMessage, Membership, NameChange, RegistryStore};
use std::sync::Arc;
use tracing::{debug, info};

const ADD_RECIPIENT_PREFIX: &str = "+admin ";
const REMOVE_RECIPIENT_PREFIX: &str = "-admin ";
const SET_NAME_PREFIX: &str = "+nombre ";
const DELETE_NAME_PREFIX: &str = "-nombre ";
const LIST_RECIPIENTS: &str = "lista";
const LIST_NAMES: &str = "nombres";

/// A recognized administrative command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddRecipient { digits: String },
    RemoveRecipient { digits: String },
    ListRecipients,
    SetName { device_id: String, name: String },
    DeleteName { device_id: String },
    ListNames,
}

/// A recognized command with unusable arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    AddRecipient,
    RemoveRecipient,
    SetName,
    DeleteName,
}

impl UsageError {
    /// Reply explaining the expected form
    pub fn help(&self) -> &'static str {
        match self {
            UsageError::AddRecipient => "Usage: +admin 1156511800 (7-12 digits)",
            UsageError::RemoveRecipient => "Usage: -admin 1156511800",
            UsageError::SetName => "Usage: +nombre <IMEI> <Name>",
            UsageError::DeleteName => "Usage: -nombre <IMEI>",
        }
    }
}

impl Command {
    /// Parse a message body
    ///
    /// # Returns
    ///
    /// - `Ok(Some(command))`: A recognized command
    /// - `Ok(None)`: Not a command (ignored without reply)
    /// - `Err(usage)`: A recognized command with bad arguments
    pub fn parse(body: &str) -> std::result::Result<Option<Command>, UsageError> {
        if let Some(rest) = body.strip_prefix(ADD_RECIPIENT_PREFIX) {
            let digits = rest.trim();
            if !is_valid_local_number(digits) {
                return Err(UsageError::AddRecipient);
            }
            return Ok(Some(Command::AddRecipient {
                digits: digits.to_string(),
            }));
        }

        if let Some(rest) = body.strip_prefix(REMOVE_RECIPIENT_PREFIX) {
            let digits = rest.trim();
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(UsageError::RemoveRecipient);
            }
            return Ok(Some(Command::RemoveRecipient {
                digits: digits.to_string(),
            }));
        }

        if let Some(rest) = body.strip_prefix(SET_NAME_PREFIX) {
            let mut tokens = rest.split_whitespace();
            let (Some(device_id), Some(first)) = (tokens.next(), tokens.next()) else {
                return Err(UsageError::SetName);
            };
            let name = std::iter::once(first).chain(tokens).collect::<Vec<_>>().join(" ");
            return Ok(Some(Command::SetName {
                device_id: device_id.to_string(),
                name,
            }));
        }

        if let Some(rest) = body.strip_prefix(DELETE_NAME_PREFIX) {
            let device_id = rest.trim();
            if device_id.is_empty() {
                return Err(UsageError::DeleteName);
            }
            return Ok(Some(Command::DeleteName {
                device_id: device_id.to_string(),
            }));
        }

        let keyword = body.trim().to_lowercase();
        if keyword == LIST_RECIPIENTS {
            return Ok(Some(Command::ListRecipients));
        }
        if keyword == LIST_NAMES {
            return Ok(Some(Command::ListNames));
        }

        Ok(None)
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddRecipient { .. } => "+admin",
            Command::RemoveRecipient { .. } => "-admin",
            Command::ListRecipients => "lista",
            Command::SetName { .. } => "+nombre",
            Command::DeleteName { .. } => "-nombre",
            Command::ListNames => "nombres",
        }
    }
}

/// Applies operator commands to the registries and replies
#[derive(Clone)]
pub struct CommandInterpreter {
    operator: String,
    addresses: AddressFormat,
    registry: Arc<dyn RegistryStore>,
    dispatcher: Dispatcher,
}

impl CommandInterpreter {
    /// Create a new interpreter
    ///
    /// # Parameters
    ///
    /// - `operator`: Full address of the only authorized sender
    /// - `addresses`: Format used to normalize and display numbers
    /// - `registry`: Registry store mutated by commands
    /// - `dispatcher`: Used to send replies to the operator
    pub fn new(
        operator: impl Into<String>,
        addresses: AddressFormat,
        registry: Arc<dyn RegistryStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            operator: operator.into(),
            addresses,
            registry,
            dispatcher,
        }
    }

    /// Handle one inbound message
    ///
    /// # Returns
    ///
    /// - `Ok(Some(reply))`: The reply sent to the operator
    /// - `Ok(None)`: Unauthorized sender or not a command
    /// - `Err(Error)`: A registry write failed
    ///
    /// A reply that the gateway fails to deliver is logged by the
    /// dispatcher and still returned here.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Option<String>> {
        if message.sender != self.operator {
            debug!("Ignoring message from unauthorized sender {}", message.sender);
            return Ok(None);
        }

        let reply = match Command::parse(&message.text) {
            Ok(Some(command)) => {
                info!("Operator command: {}", command.name());
                self.execute(command).await?
            }
            Ok(None) => return Ok(None),
            Err(usage) => usage.help().to_string(),
        };

        let _ = self.dispatcher.send_to(&self.operator, &reply).await;
        Ok(Some(reply))
    }

    /// Apply a command and build its reply
    pub async fn execute(&self, command: Command) -> Result<String> {
        match command {
            Command::AddRecipient { digits } => {
                let address = self.addresses.normalize(&digits);
                Ok(match self.registry.add_recipient(&address).await? {
                    Membership::Added => format!("{} added to notifications.", digits),
                    _ => format!("{} is already present.", digits),
                })
            }
            Command::RemoveRecipient { digits } => {
                let address = self.addresses.normalize(&digits);
                Ok(match self.registry.remove_recipient(&address).await? {
                    Membership::Removed => format!("{} removed.", digits),
                    _ => format!("{} not found.", digits),
                })
            }
            Command::ListRecipients => {
                let recipients = self.registry.recipients().await?;
                let numbers: Vec<&str> = recipients
                    .iter()
                    .map(|address| self.addresses.short_form(address))
                    .collect();
                let listing = if numbers.is_empty() {
                    "none".to_string()
                } else {
                    numbers.join(", ")
                };
                Ok(format!("Notified numbers:\n{}", listing))
            }
            Command::SetName { device_id, name } => {
                let change = self.registry.set_name(&device_id, &name).await?;
                Ok(match change {
                    NameChange::Registered => format!("Registered: {} ({})", name, device_id),
                    NameChange::Renamed { previous } => {
                        format!("Registered: {} ({}), was {}", name, device_id, previous)
                    }
                })
            }
            Command::DeleteName { device_id } => {
                Ok(if self.registry.delete_name(&device_id).await? {
                    format!("Name removed: {}", device_id)
                } else {
                    format!("Device not registered: {}", device_id)
                })
            }
            Command::ListNames => {
                let names = self.registry.names().await?;
                if names.is_empty() {
                    return Ok("No devices registered.".to_string());
                }
                let mut listing = String::from("Monitored devices:\n");
                for (device_id, name) in names {
                    listing.push_str(&format!("\n- {}\n  ({})", name, device_id));
                }
                Ok(listing)
            }
        }
    }
}
