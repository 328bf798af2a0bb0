//! Subscriber number normalization.
//!
//! Every provider client accepts numbers in any of the common spellings
//! (`841234567`, `+258 84 123 4567`, `258841234567`) and reduces them to the
//! nine-digit local form before anything is sent over the network.

use std::sync::LazyLock;

use regex::Regex;

use super::error::{GatewayError, GatewayResult};

const COUNTRY_CODE: &str = "258";

static LOCAL_MSISDN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^8[2-7][0-9]{7}$").expect("valid MSISDN pattern"));

/// Vodacom subscriber prefixes, served by M-Pesa.
pub const MPESA_PREFIXES: &[&str] = &["84", "85"];

/// Movitel subscriber prefixes, served by eMola.
pub const EMOLA_PREFIXES: &[&str] = &["86", "87"];

/// Normalize a subscriber number to nine local digits and check that it
/// belongs to one of `prefixes`.
pub fn normalize_msisdn(raw: &str, prefixes: &[&str]) -> GatewayResult<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);
    let local = match digits.strip_prefix(COUNTRY_CODE) {
        Some(rest) if rest.len() == 9 => rest,
        _ => digits,
    };

    if !LOCAL_MSISDN.is_match(local) {
        return Err(GatewayError::validation(
            "phone",
            format!("invalid phone number: {raw}"),
        ));
    }
    if !prefixes.iter().any(|prefix| local.starts_with(prefix)) {
        return Err(GatewayError::validation(
            "phone",
            format!(
                "phone number {raw} is not served by this provider (expected prefix {})",
                prefixes.join("/")
            ),
        ));
    }

    Ok(local.to_string())
}

/// International form (`258XXXXXXXXX`) of a normalized local number.
pub fn to_international(local: &str) -> String {
    format!("{COUNTRY_CODE}{local}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_spellings() {
        for raw in ["841234567", "+258 84 123 4567", "258841234567", "84-123-4567"] {
            assert_eq!(
                normalize_msisdn(raw, MPESA_PREFIXES).expect(raw),
                "841234567"
            );
        }
    }

    #[test]
    fn rejects_short_and_foreign_numbers() {
        for raw in ["12345", "", "8412345678", "941234567", "+27841234567"] {
            let err = normalize_msisdn(raw, MPESA_PREFIXES).expect_err(raw);
            assert!(matches!(err, GatewayError::Validation { .. }));
        }
    }

    #[test]
    fn rejects_other_operators_prefix() {
        assert!(normalize_msisdn("861234567", MPESA_PREFIXES).is_err());
        assert!(normalize_msisdn("861234567", EMOLA_PREFIXES).is_ok());
    }

    #[test]
    fn international_form_prepends_country_code() {
        assert_eq!(to_international("841234567"), "258841234567");
    }
}
