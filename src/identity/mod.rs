//! Record identity strategies.
//!
//! A deployment keys its student records one of two ways: a deterministic
//! key derived from date of birth and phone number, or a random opaque id
//! paired with a secret edit token. The two are never mixed within one
//! deployment.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::AppError;

/// How student record ids are produced for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    /// Deterministic key built from validated dob + phone.
    Derived,
    /// Random 32-hex-char id plus a secret edit token.
    Random,
}

impl IdMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "derived" => Some(IdMode::Derived),
            "random" => Some(IdMode::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdMode::Derived => "derived",
            IdMode::Random => "random",
        }
    }
}

/// Random bytes behind an edit token (192 bits).
const EDIT_TOKEN_BYTES: usize = 24;

/// Maximum length of a student display name.
pub const MAX_NAME_LEN: usize = 100;

/// Validate a date of birth: exactly 8 digits (YYYYMMDD).
pub fn validate_dob(dob: &str) -> Result<(), AppError> {
    if dob.len() != 8 || !dob.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::Validation(
            "dob must be exactly 8 digits (YYYYMMDD)".to_string(),
        ));
    }
    Ok(())
}

/// Validate a phone number: digits only, 7 to 20 characters.
pub fn validate_phone(phone: &str) -> Result<(), AppError> {
    if phone.len() < 7 || phone.len() > 20 || !phone.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::Validation(
            "phone must be 7-20 digits".to_string(),
        ));
    }
    Ok(())
}

/// Validate a display name.
pub fn validate_name(name: &str) -> Result<(), AppError> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Derive a record id from identity fields.
///
/// The id is the plain concatenation `dob + phone`, so resolving twice with
/// the same inputs yields the same id. The same person with the same phone
/// lands on the same record.
pub fn derive_student_id(dob: &str, phone: &str) -> Result<String, AppError> {
    validate_dob(dob)?;
    validate_phone(phone)?;
    Ok(format!("{}{}", dob, phone))
}

/// Generate a random, unguessable id (32 hex characters).
///
/// Used for student records in random mode and for submissions.
pub fn generate_opaque_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Generate a secret edit token, independent of the record id.
///
/// URL-safe so it can travel in links without escaping. Never logged.
pub fn generate_edit_token() -> String {
    let mut bytes = [0u8; EDIT_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive_student_id("20010403", "09012345678").unwrap();
        let b = derive_student_id("20010403", "09012345678").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "2001040309012345678");
    }

    #[test]
    fn test_derive_rejects_malformed_dob() {
        assert!(derive_student_id("2001-04-03", "09012345678").is_err());
        assert!(derive_student_id("200104", "09012345678").is_err());
        assert!(derive_student_id("2001040a", "09012345678").is_err());
    }

    #[test]
    fn test_derive_rejects_malformed_phone() {
        assert!(derive_student_id("20010403", "123456").is_err());
        assert!(derive_student_id("20010403", "090-1234-5678").is_err());
        assert!(derive_student_id("20010403", "123456789012345678901").is_err());
    }

    #[test]
    fn test_opaque_id_is_32_hex_chars() {
        let id = generate_opaque_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_opaque_ids_are_distinct() {
        assert_ne!(generate_opaque_id(), generate_opaque_id());
    }

    #[test]
    fn test_edit_token_is_url_safe_and_distinct() {
        let token = generate_edit_token();
        assert_eq!(token.len(), 32);
        assert!(token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        assert_ne!(token, generate_edit_token());
    }

    #[test]
    fn test_name_length_limit() {
        assert!(validate_name(&"a".repeat(100)).is_ok());
        assert!(validate_name(&"a".repeat(101)).is_err());
    }
}
