//! Alert text formatting

use crate::config::InputLabels;
use crate::wire::InputId;

/// Display name used when a device has no registered name
pub fn default_display_name(device_id: &str) -> String {
    format!("Device {}", device_id)
}

/// Render the two-line alert for one input transition
///
/// ```text
/// ALERT: Tamper ACTIVE
/// North Branch
/// ```
pub fn format_alert(
    labels: &InputLabels,
    input: InputId,
    asserted: bool,
    display_name: &str,
) -> String {
    let (severity, state) = if asserted {
        ("ALERT", "ACTIVE")
    } else {
        ("NORMAL", "CLEARED")
    };

    format!(
        "{}: {} {}\n{}",
        severity,
        labels.label(input),
        state,
        display_name
    )
}
