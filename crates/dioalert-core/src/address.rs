//! Recipient address normalization
//!
//! Operators type local numbers (`1155512345`); the gateway wants full
//! addresses (`5491155512345@s.whatsapp.net`). The durable recipient list
//! and every operator-facing reply use the short form.

use serde::{Deserialize, Serialize};

/// Shortest local number accepted by `+admin`
pub const MIN_LOCAL_DIGITS: usize = 7;

/// Longest local number accepted by `+admin`
pub const MAX_LOCAL_DIGITS: usize = 12;

/// Country code and gateway domain used to build full addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFormat {
    pub country_code: String,
    pub domain: String,
}

impl AddressFormat {
    pub fn new(country_code: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            domain: domain.into(),
        }
    }

    /// Full gateway address for a digit string
    ///
    /// The country code is prepended unless the digits already start with
    /// it.
    pub fn normalize(&self, digits: &str) -> String {
        let digits = digits.trim();
        if digits.starts_with(&self.country_code) {
            format!("{}@{}", digits, self.domain)
        } else {
            format!("{}{}@{}", self.country_code, digits, self.domain)
        }
    }

    /// Short display form of a full address
    ///
    /// Strips the `@domain` suffix, then the country code, from the start
    /// of the number only.
    pub fn short_form<'a>(&self, address: &'a str) -> &'a str {
        let suffix = format!("@{}", self.domain);
        let number = address.strip_suffix(suffix.as_str()).unwrap_or(address);
        number
            .strip_prefix(self.country_code.as_str())
            .unwrap_or(number)
    }
}

/// Whether `raw` is an acceptable local number for `+admin`
pub fn is_valid_local_number(raw: &str) -> bool {
    (MIN_LOCAL_DIGITS..=MAX_LOCAL_DIGITS).contains(&raw.len())
        && raw.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> AddressFormat {
        AddressFormat::new("549", "s.whatsapp.net")
    }

    #[test]
    fn normalize_prefixes_country_code_and_domain() {
        assert_eq!(
            format().normalize("1155512345"),
            "5491155512345@s.whatsapp.net"
        );
    }

    #[test]
    fn normalize_keeps_existing_country_code() {
        assert_eq!(
            format().normalize("5491155512345"),
            "5491155512345@s.whatsapp.net"
        );
    }

    #[test]
    fn short_form_inverts_normalize() {
        let format = format();
        for digits in ["1155512345", "1156511894", "2215549000", "1234567"] {
            assert_eq!(format.short_form(&format.normalize(digits)), digits);
        }
    }

    #[test]
    fn short_form_only_strips_leading_country_code() {
        // The country-code digits appear inside the local number.
        let format = format();
        let address = format.normalize("1154912345");
        assert_eq!(format.short_form(&address), "1154912345");
    }

    #[test]
    fn short_form_leaves_foreign_addresses_alone() {
        assert_eq!(format().short_form("group-123@g.us"), "group-123@g.us");
    }

    #[test]
    fn local_number_validation() {
        assert!(is_valid_local_number("1155512"));
        assert!(is_valid_local_number("115551234567"));
        assert!(!is_valid_local_number("115551"));
        assert!(!is_valid_local_number("1155512345678"));
        assert!(!is_valid_local_number("11555a2345"));
        assert!(!is_valid_local_number(""));
    }
}
