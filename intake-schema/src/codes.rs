//! Procedure and provider code validators.

use regex::Regex;
use std::sync::LazyLock;

static CPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}$").expect("valid CPT regex"));

static HCPCS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\d{4}$").expect("valid HCPCS regex"));

/// Whether a code is shaped like a CPT code (five digits).
pub fn is_valid_cpt(code: &str) -> bool {
    CPT.is_match(code)
}

/// Whether a code is shaped like an HCPCS Level II code (letter + four
/// digits).
pub fn is_valid_hcpcs(code: &str) -> bool {
    HCPCS.is_match(code)
}

/// Validate a 10-digit NPI using the Luhn check over the `80840`-prefixed
/// card number, per the CMS NPI standard.
pub fn is_valid_npi(npi: &str) -> bool {
    if npi.len() != 10 || !npi.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let full: Vec<u32> = "80840"
        .bytes()
        .chain(npi.bytes())
        .map(|b| u32::from(b - b'0'))
        .collect();
    let sum: u32 = full
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &digit)| {
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpt_shape() {
        assert!(is_valid_cpt("99213"));
        assert!(is_valid_cpt("11042"));
        assert!(!is_valid_cpt("9921"));
        assert!(!is_valid_cpt("992134"));
        assert!(!is_valid_cpt("A9213"));
    }

    #[test]
    fn hcpcs_shape() {
        assert!(is_valid_hcpcs("J1100"));
        assert!(is_valid_hcpcs("A0425"));
        assert!(!is_valid_hcpcs("j1100"));
        assert!(!is_valid_hcpcs("99213"));
        assert!(!is_valid_hcpcs("J110"));
    }

    #[test]
    fn npi_luhn() {
        // Standard CMS example NPI with valid check digit.
        assert!(is_valid_npi("1234567893"));
        assert!(!is_valid_npi("1234567890"));
        assert!(!is_valid_npi("123456789"));
        assert!(!is_valid_npi("12345678901"));
        assert!(!is_valid_npi("12345a7893"));
    }
}
