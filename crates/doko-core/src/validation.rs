//! # Validation Module
//!
//! Input validation for DOKO requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Frontend (React forms)                                       │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: axum extractors (Rust)                                       │
//! │  ├── Type validation (deserialization)                                 │
//! │  └── THIS MODULE: field rules, run before ANY mutation                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (stock_quantity >= 0)                                       │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{LineRequest, ShippingAddress};
use crate::{MAX_LINE_QUANTITY, MAX_ORDER_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn max_len(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    if value.trim().chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Catalog Validators
// =============================================================================

/// Validates a product name (1..=200 characters).
///
/// ```rust
/// use doko_core::validation::validate_product_name;
///
/// assert!(validate_product_name("Organic Tomatoes").is_ok());
/// assert!(validate_product_name("   ").is_err());
/// ```
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    required("name", name)?;
    max_len("name", name, 200)
}

/// Validates a selling unit label ("kg", "crate").
pub fn validate_unit(unit: &str) -> ValidationResult<()> {
    required("unit", unit)?;
    max_len("unit", unit, 20)
}

/// Validates a unit price in paisa. Listings must cost something.
pub fn validate_price_paisa(paisa: i64) -> ValidationResult<()> {
    if paisa <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "price".to_string(),
        });
    }
    Ok(())
}

/// Validates a stock level. Zero is allowed (listed but sold out).
pub fn validate_stock_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::OutOfRange {
            field: "stock_quantity".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// Order Validators
// =============================================================================

/// Validates a requested quantity (1..=MAX_LINE_QUANTITY).
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates the cart submitted with an order.
///
/// ## Rules
/// - At least one line, at most MAX_ORDER_LINES
/// - Every product id present, every quantity valid
/// - A product may appear only once (clients must merge quantities)
pub fn validate_line_requests(lines: &[LineRequest]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if lines.len() > MAX_ORDER_LINES {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_ORDER_LINES as i64,
        });
    }

    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        required("product_id", &line.product_id)?;
        validate_quantity(line.quantity)?;
        if !seen.insert(line.product_id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "product_id".to_string(),
                value: line.product_id.clone(),
            });
        }
    }

    Ok(())
}

/// Validates a Nepali phone number.
///
/// Accepts an optional `+977`/`977` prefix, spaces and hyphens, then either
/// a 10-digit mobile number starting with 9 or a 7-9 digit landline.
///
/// ```rust
/// use doko_core::validation::validate_phone;
///
/// assert!(validate_phone("9841234567").is_ok());
/// assert!(validate_phone("+977-984-1234567").is_ok());
/// assert!(validate_phone("01-4412345").is_ok());
/// assert!(validate_phone("12ab").is_err());
/// ```
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    required("phone", phone)?;

    let compact: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let digits = compact
        .strip_prefix("+977")
        .or_else(|| compact.strip_prefix("977").filter(|rest| rest.len() == 10))
        .unwrap_or(&compact);

    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "phone".to_string(),
        reason: reason.to_string(),
    };

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("must contain only digits"));
    }

    let is_mobile = digits.len() == 10 && digits.starts_with('9');
    let is_landline = (7..=9).contains(&digits.len()) && !digits.starts_with('9');
    if !is_mobile && !is_landline {
        return Err(invalid("must be a 10-digit mobile or a landline number"));
    }

    Ok(())
}

/// Validates the embedded shipping address.
pub fn validate_shipping_address(address: &ShippingAddress) -> ValidationResult<()> {
    required("recipient_name", &address.recipient_name)?;
    max_len("recipient_name", &address.recipient_name, 100)?;
    validate_phone(&address.phone)?;
    required("address", &address.address)?;
    max_len("address", &address.address, 300)?;
    if let Some(city) = &address.city {
        max_len("city", city, 100)?;
    }
    Ok(())
}

/// Validates a refund reason.
pub fn validate_refund_reason(reason: &str) -> ValidationResult<()> {
    required("reason", reason)?;
    max_len("reason", reason, 500)
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string.
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    required(field, id)?;

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: &str, quantity: i64) -> LineRequest {
        LineRequest {
            product_id: product_id.to_string(),
            quantity,
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient_name: "Sita Sharma".into(),
            phone: "9841234567".into(),
            address: "Baneshwor, Ward 10".into(),
            city: Some("Kathmandu".into()),
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_line_requests() {
        assert!(validate_line_requests(&[line("a", 1), line("b", 2)]).is_ok());

        let err = validate_line_requests(&[]).unwrap_err();
        assert_eq!(err.field(), "items");

        let err = validate_line_requests(&[line("a", 1), line("a", 2)]).unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { .. }));

        assert!(validate_line_requests(&[line("", 1)]).is_err());
        assert!(validate_line_requests(&[line("a", 0)]).is_err());

        let too_many: Vec<_> = (0..=MAX_ORDER_LINES)
            .map(|i| line(&format!("p{i}"), 1))
            .collect();
        assert!(validate_line_requests(&too_many).is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("9841234567").is_ok());
        assert!(validate_phone("+9779841234567").is_ok());
        assert!(validate_phone("9779841234567").is_ok());
        assert!(validate_phone("014412345").is_ok());

        assert!(validate_phone("").is_err());
        assert!(validate_phone("98412").is_err());
        assert!(validate_phone("98412345678").is_err());
        assert!(validate_phone("98412x4567").is_err());
    }

    #[test]
    fn test_validate_shipping_address() {
        assert!(validate_shipping_address(&address()).is_ok());

        let mut missing_name = address();
        missing_name.recipient_name = "  ".into();
        assert_eq!(
            validate_shipping_address(&missing_name).unwrap_err().field(),
            "recipient_name"
        );

        let mut missing_address = address();
        missing_address.address.clear();
        assert_eq!(
            validate_shipping_address(&missing_address).unwrap_err().field(),
            "address"
        );

        let mut bad_phone = address();
        bad_phone.phone = "call me".into();
        assert_eq!(validate_shipping_address(&bad_phone).unwrap_err().field(), "phone");
    }

    #[test]
    fn test_validate_catalog_fields() {
        assert!(validate_product_name("Rato Pyaj").is_ok());
        assert!(validate_product_name(&"A".repeat(201)).is_err());
        assert!(validate_price_paisa(1).is_ok());
        assert!(validate_price_paisa(0).is_err());
        assert!(validate_stock_quantity(0).is_ok());
        assert!(validate_stock_quantity(-1).is_err());
        assert!(validate_unit("kg").is_ok());
        assert!(validate_unit("").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("order_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("order_id", "").is_err());
        assert!(validate_uuid("order_id", "not-a-uuid").is_err());
    }
}
