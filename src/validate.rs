//! Credential well-formedness checks used by the registration and login
//! screens. Store operations do not enforce these; the backend has the final
//! say on both.

use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn is_acceptable_password(password: &str) -> bool {
    password.len() >= MIN_PASSWORD_LEN
}

#[cfg(test)]
mod validate_tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("ana@learnlab.test"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two@at@signs.com"));
        assert!(!is_valid_email("spaces in@address.com"));
        assert!(!is_valid_email("missing@tld"));
    }

    #[test]
    fn password_length_floor() {
        assert!(!is_acceptable_password("short"));
        assert!(is_acceptable_password("long-enough-pw"));
    }
}
