//! # Validation Module
//!
//! Input validation for identifiers, names and shipping addresses.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP handler                                                  │
//! │  └── Type validation (deserialization)                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  └── Field rules before any state is touched                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  └── NOT NULL, UNIQUE, CHECK and foreign key constraints                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::ShippingAddress;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_NAME_LEN: usize = 200;
const MAX_ID_LEN: usize = 64;
const MAX_LINE_LEN: usize = 250;

// =============================================================================
// String Validators
// =============================================================================

/// Non-empty, trimmed and at most `max` characters.
pub fn validate_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Validates an opaque identifier such as a product or customization id.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, digits, hyphens and underscores only
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    validate_text(field, id, MAX_ID_LEN)?;
    if !id
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }
    Ok(())
}

/// Commission config and product names.
pub fn validate_name(name: &str) -> ValidationResult<()> {
    validate_text("name", name, MAX_NAME_LEN)
}

/// Free-text reasons (cancellation, rejection). Required, bounded.
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    validate_text("reason", reason, 500)
}

// =============================================================================
// Address Validators
// =============================================================================

/// 10 digits, optionally prefixed with `+91`.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let phone = phone.trim();
    let digits = phone.strip_prefix("+91").unwrap_or(phone).trim();
    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must be a 10-digit number".to_string(),
        });
    }
    Ok(())
}

/// Six-digit PIN code not starting with 0.
pub fn validate_postal_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();
    let valid = code.len() == 6
        && code.chars().all(|c| c.is_ascii_digit())
        && !code.starts_with('0');
    if !valid {
        return Err(ValidationError::InvalidFormat {
            field: "postal_code".to_string(),
            reason: "must be a 6-digit PIN code".to_string(),
        });
    }
    Ok(())
}

/// Validates every field of a shipping address.
pub fn validate_address(address: &ShippingAddress) -> ValidationResult<()> {
    validate_text("recipient_name", &address.recipient_name, MAX_NAME_LEN)?;
    validate_phone(&address.phone)?;
    validate_text("line1", &address.line1, MAX_LINE_LEN)?;
    if let Some(line2) = &address.line2 {
        if line2.chars().count() > MAX_LINE_LEN {
            return Err(ValidationError::TooLong {
                field: "line2".to_string(),
                max: MAX_LINE_LEN,
            });
        }
    }
    validate_text("city", &address.city, 100)?;
    validate_text("state", &address.state, 100)?;
    validate_postal_code(&address.postal_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient_name: "Asha Rao".into(),
            phone: "+91 9876543210".into(),
            line1: "12 MG Road".into(),
            line2: None,
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            postal_code: "560001".into(),
        }
    }

    #[test]
    fn test_valid_address() {
        assert!(validate_address(&address()).is_ok());
    }

    #[test]
    fn test_bad_fields() {
        let mut a = address();
        a.postal_code = "012345".into();
        assert!(validate_address(&a).is_err());

        let mut a = address();
        a.phone = "12345".into();
        assert!(matches!(
            validate_address(&a),
            Err(ValidationError::InvalidFormat { .. })
        ));

        let mut a = address();
        a.city = "   ".into();
        assert!(matches!(validate_address(&a), Err(ValidationError::Required { .. })));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("product_id", "tee-001").is_ok());
        assert!(validate_id("product_id", "").is_err());
        assert!(validate_id("product_id", "tee 001").is_err());
        assert!(validate_id("product_id", &"x".repeat(65)).is_err());
    }
}
