// 🏛️ Label Catalog - Which property labels feed which output column
// Property labels are free text owned by each project. Only a handful carry
// meaning for the marketing view; everything else is ignored.

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Fractional digits kept for numeric columns (`DECIMAL(10,2)`)
pub const DECIMAL_SCALE: u32 = 2;

/// Total digits allowed for numeric columns (`DECIMAL(10,2)`)
pub const DECIMAL_PRECISION: u32 = 10;

static EMAIL_CONTENTS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)FROM:(.+?) CONTENTS").unwrap());

static NUMERIC_LITERAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d*)(?:\.(\d*))?(?:[eE]([+-]?\d+))?$").unwrap());

// ============================================================================
// OUTPUT COLUMNS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputColumn {
    CustomerEmail,
    AvgMessageVolume,
    EstimatedClientVolumeUsd,
    Plan,
    InterestedInProduct,
}

impl OutputColumn {
    /// Column name in the `projects_for_marketing` relation
    pub fn name(&self) -> &'static str {
        match self {
            OutputColumn::CustomerEmail => "customer_email",
            OutputColumn::AvgMessageVolume => "avg_message_volume",
            OutputColumn::EstimatedClientVolumeUsd => "estimated_client_volume_usd",
            OutputColumn::Plan => "plan",
            OutputColumn::InterestedInProduct => "interested_in_product",
        }
    }
}

// ============================================================================
// VALUE TRANSFORMS
// ============================================================================

/// Why a single value could not fill its column
///
/// None of these abort a run; the column is simply left empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("value is NULL")]
    Null,

    #[error("not a number: {0:?}")]
    NotANumber(String),

    #[error("numeric field overflow: {0}")]
    Overflow(String),

    #[error("no FROM:...CONTENTS marker in email contents")]
    NoEmailMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueTransform {
    /// Copy the raw text
    Raw,

    /// Pull the sender address out of a raw message dump
    EmailFromContents,

    /// Parse as `DECIMAL(10,2)`
    Decimal2,
}

/// A transformed value ready to be placed in a column
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
}

impl ValueTransform {
    pub fn apply(&self, raw: Option<&str>) -> Result<FieldValue, ValueError> {
        let raw = raw.ok_or(ValueError::Null)?;

        match self {
            ValueTransform::Raw => Ok(FieldValue::Text(raw.to_string())),
            ValueTransform::EmailFromContents => extract_email(raw)
                .map(|email| FieldValue::Text(email.to_string()))
                .ok_or(ValueError::NoEmailMarker),
            ValueTransform::Decimal2 => parse_decimal(raw).map(FieldValue::Number),
        }
    }
}

/// Extract the text between `FROM:` and ` CONTENTS` (first match only)
///
/// Example:
/// ```
/// use lead_pipeline::attributes::extract_email;
///
/// let raw = "HEADER FROM:alice@example.com CONTENTS hello";
/// assert_eq!(extract_email(raw), Some("alice@example.com"));
/// ```
pub fn extract_email(contents: &str) -> Option<&str> {
    EMAIL_CONTENTS_REGEX
        .captures(contents)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse text the way a `CAST(value AS DECIMAL(10,2))` does
///
/// Whitespace around the number is ignored, scientific notation is accepted,
/// the result is rounded half away from zero to two places, and anything that
/// needs more than eight integer digits overflows.
pub fn parse_decimal(raw: &str) -> Result<Decimal, ValueError> {
    let text = raw.trim();

    let parsed = match Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)) {
        Ok(parsed) => parsed,
        Err(_) => return beyond_decimal_range(raw, text),
    };

    let mut rounded =
        parsed.round_dp_with_strategy(DECIMAL_SCALE, RoundingStrategy::MidpointAwayFromZero);

    let limit = Decimal::from(10_i64.pow(DECIMAL_PRECISION - DECIMAL_SCALE));
    if rounded.abs() >= limit {
        return Err(ValueError::Overflow(text.to_string()));
    }

    rounded.rescale(DECIMAL_SCALE);
    Ok(rounded)
}

/// A well-formed number `Decimal` cannot hold: too large overflows, too
/// small rounds to zero
fn beyond_decimal_range(raw: &str, text: &str) -> Result<Decimal, ValueError> {
    let not_a_number = || ValueError::NotANumber(raw.to_string());

    let caps = NUMERIC_LITERAL_REGEX.captures(text).ok_or_else(not_a_number)?;
    let integer = caps.get(1).map_or("", |m| m.as_str());
    let fraction = caps.get(2).map_or("", |m| m.as_str());
    if integer.is_empty() && fraction.is_empty() {
        return Err(not_a_number());
    }
    let exponent: i64 = match caps.get(3) {
        Some(m) => m.as_str().parse().map_err(|_| not_a_number())?,
        None => 0,
    };

    // The value is below 10^magnitude
    let significant = integer.trim_start_matches('0');
    let magnitude = if !significant.is_empty() {
        significant.len() as i64 + exponent
    } else {
        let fraction_digits = fraction.trim_start_matches('0');
        if fraction_digits.is_empty() {
            return Ok(Decimal::new(0, DECIMAL_SCALE));
        }
        exponent - (fraction.len() - fraction_digits.len()) as i64
    };

    if magnitude > i64::from(DECIMAL_PRECISION - DECIMAL_SCALE) {
        Err(ValueError::Overflow(text.to_string()))
    } else if magnitude <= -(i64::from(DECIMAL_SCALE) + 1) {
        Ok(Decimal::new(0, DECIMAL_SCALE))
    } else {
        Err(not_a_number())
    }
}

// ============================================================================
// LABEL DEFINITION
// ============================================================================

/// How one property label maps onto the flattened record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelDefinition {
    /// Label as it appears in the property catalog (exact match)
    pub label: String,

    /// Destination column
    pub column: OutputColumn,

    /// Transform applied to the raw value
    pub transform: ValueTransform,

    /// Higher wins when several labels feed the same column
    pub priority: u8,
}

impl LabelDefinition {
    pub fn new(label: impl Into<String>, column: OutputColumn, transform: ValueTransform) -> Self {
        LabelDefinition {
            label: label.into(),
            column,
            transform,
            priority: 0,
        }
    }

    /// Builder: set priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

// ============================================================================
// LABEL CATALOG
// ============================================================================

/// Registry of the labels the marketing view understands
pub struct LabelCatalog {
    labels: HashMap<String, LabelDefinition>,
}

impl LabelCatalog {
    /// Create a catalog with the marketing labels registered
    pub fn new() -> Self {
        let mut catalog = LabelCatalog {
            labels: HashMap::new(),
        };

        catalog.register_marketing_labels();
        catalog
    }

    fn register_marketing_labels(&mut self) {
        // Direct addresses outrank the ones dug out of message dumps
        self.register(
            LabelDefinition::new("email", OutputColumn::CustomerEmail, ValueTransform::Raw)
                .with_priority(1),
        );

        self.register(
            LabelDefinition::new("e-mail", OutputColumn::CustomerEmail, ValueTransform::Raw)
                .with_priority(1),
        );

        self.register(
            LabelDefinition::new(
                "email_contents",
                OutputColumn::CustomerEmail,
                ValueTransform::EmailFromContents,
            ),
        );

        self.register(
            LabelDefinition::new(
                "avg_message_volume",
                OutputColumn::AvgMessageVolume,
                ValueTransform::Decimal2,
            ),
        );

        self.register(
            LabelDefinition::new(
                "estimated_client_volume_usd",
                OutputColumn::EstimatedClientVolumeUsd,
                ValueTransform::Decimal2,
            ),
        );

        self.register(LabelDefinition::new("plan", OutputColumn::Plan, ValueTransform::Raw));

        self.register(
            LabelDefinition::new(
                "interested_in_product",
                OutputColumn::InterestedInProduct,
                ValueTransform::Raw,
            ),
        );
    }

    /// Register (or replace) a label definition
    pub fn register(&mut self, definition: LabelDefinition) {
        self.labels.insert(definition.label.clone(), definition);
    }

    /// Look up a label; `None` means the label is ignored
    pub fn get(&self, label: &str) -> Option<&LabelDefinition> {
        self.labels.get(label)
    }
}

impl Default for LabelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_marketing_labels() {
        let catalog = LabelCatalog::new();

        for label in [
            "email",
            "e-mail",
            "email_contents",
            "avg_message_volume",
            "estimated_client_volume_usd",
            "plan",
            "interested_in_product",
        ] {
            assert!(catalog.get(label).is_some(), "missing {}", label);
        }
        assert!(catalog.get("favourite_color").is_none());

        let direct = catalog.get("e-mail").unwrap();
        let extracted = catalog.get("email_contents").unwrap();
        assert_eq!(direct.column, OutputColumn::CustomerEmail);
        assert_eq!(extracted.column, OutputColumn::CustomerEmail);
        assert!(direct.priority > extracted.priority);
        assert_eq!(catalog.get("email").unwrap().priority, direct.priority);
    }

    #[test]
    fn test_extract_email() {
        let raw = "...FROM:alice@example.com CONTENTS...";
        assert_eq!(extract_email(raw), Some("alice@example.com"));
    }

    #[test]
    fn test_extract_email_first_match_only() {
        let raw = "FROM:a@x.io CONTENTS hi FROM:b@y.io CONTENTS bye";
        assert_eq!(extract_email(raw), Some("a@x.io"));
    }

    #[test]
    fn test_extract_email_spans_lines() {
        let raw = "FROM:bob\n@example.com CONTENTS";
        assert_eq!(extract_email(raw), Some("bob\n@example.com"));
    }

    #[test]
    fn test_extract_email_requires_both_markers() {
        assert_eq!(extract_email("FROM:alice@example.com"), None);
        assert_eq!(extract_email("alice@example.com CONTENTS"), None);
        assert_eq!(extract_email("FROM: CONTENTS"), None);
    }

    #[test]
    fn test_parse_decimal_two_places() {
        let d = parse_decimal("6000").unwrap();
        assert_eq!(d.to_string(), "6000.00");

        let d = parse_decimal(" 1234.5 ").unwrap();
        assert_eq!(d.to_string(), "1234.50");
    }

    #[test]
    fn test_parse_decimal_rounds_half_away_from_zero() {
        assert_eq!(parse_decimal("2.345").unwrap().to_string(), "2.35");
        assert_eq!(parse_decimal("-2.345").unwrap().to_string(), "-2.35");
        assert_eq!(parse_decimal("2.344").unwrap().to_string(), "2.34");
    }

    #[test]
    fn test_parse_decimal_scientific() {
        assert_eq!(parse_decimal("5e3").unwrap().to_string(), "5000.00");
    }

    #[test]
    fn test_parse_decimal_rejects_text() {
        assert_eq!(
            parse_decimal("lots"),
            Err(ValueError::NotANumber("lots".to_string()))
        );
        assert!(parse_decimal("").is_err());
    }

    #[test]
    fn test_parse_decimal_tiny_values_round_to_zero() {
        assert_eq!(parse_decimal("1e-30").unwrap().to_string(), "0.00");
        assert_eq!(parse_decimal("-4.2E-40").unwrap().to_string(), "0.00");
        assert_eq!(
            parse_decimal("0.0000000000000000000000000000000007").unwrap().to_string(),
            "0.00"
        );
    }

    #[test]
    fn test_parse_decimal_huge_values_overflow() {
        assert_eq!(
            parse_decimal("123456789012345678901234567890123"),
            Err(ValueError::Overflow("123456789012345678901234567890123".to_string()))
        );
        assert!(matches!(parse_decimal("7e40"), Err(ValueError::Overflow(_))));
        assert!(matches!(parse_decimal("1e"), Err(ValueError::NotANumber(_))));
    }

    #[test]
    fn test_parse_decimal_overflow() {
        assert!(parse_decimal("99999999.99").is_ok());
        assert_eq!(
            parse_decimal("100000000"),
            Err(ValueError::Overflow("100000000".to_string()))
        );
        // Rounding can push a value over the limit
        assert!(matches!(
            parse_decimal("99999999.995"),
            Err(ValueError::Overflow(_))
        ));
    }

    #[test]
    fn test_transform_null() {
        assert_eq!(ValueTransform::Raw.apply(None), Err(ValueError::Null));
    }

    #[test]
    fn test_transform_email_contents_without_marker() {
        let result = ValueTransform::EmailFromContents.apply(Some("no markers here"));
        assert_eq!(result, Err(ValueError::NoEmailMarker));
    }

    #[test]
    fn test_transform_raw_keeps_text() {
        let result = ValueTransform::Raw.apply(Some(" Free ")).unwrap();
        assert_eq!(result, FieldValue::Text(" Free ".to_string()));
    }
}
