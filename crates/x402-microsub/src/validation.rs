//! Input validation for addresses and token amounts.
//!
//! The typed-data builder treats its inputs as preconditions; callers run
//! these checks first.

use std::sync::LazyLock;

use regex::Regex;

static ADDRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").ok());

/// `0x` followed by exactly 40 hex characters, any case.
pub fn is_valid_address(s: &str) -> bool {
    ADDRESS_RE.as_ref().is_some_and(|re| re.is_match(s))
}

/// A non-zero decimal integer in the token's smallest unit. No sign, no
/// fraction, no exponent.
pub fn is_valid_amount(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && s.bytes().any(|b| b != b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_mixed_case_addresses() {
        assert!(is_valid_address(
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        ));
        assert!(is_valid_address(
            "0x0000000000000000000000000000000000000000"
        ));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address(
            "833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        ));
        assert!(!is_valid_address(
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA0291g"
        ));
        assert!(!is_valid_address(
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA0291300"
        ));
    }

    #[test]
    fn amounts_are_positive_integers() {
        assert!(is_valid_amount("1"));
        assert!(is_valid_amount("10000"));
        assert!(is_valid_amount("007"));
        assert!(!is_valid_amount("0"));
        assert!(!is_valid_amount("000"));
        assert!(!is_valid_amount(""));
        assert!(!is_valid_amount("-5"));
        assert!(!is_valid_amount("0.01"));
        assert!(!is_valid_amount("1e6"));
    }
}
