// 🧮 Entity Attribute Flattener - projects_for_marketing
// Join values to their properties, keep the newest value per label, pivot the
// labels into columns, then keep only the marketing-qualified rows.
//
// Nothing in here aborts the batch: orphans are dropped, bad numbers leave
// the column empty, and empty columns fail the filter.

use crate::attributes::{FieldValue, LabelCatalog, OutputColumn, ValueError};
use crate::db::{Property, PropertyValue};
use crate::deduplication::{select_latest, JoinedValue};
use crate::rules::MarketingRules;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Width of the text columns in the marketing relation (`VARCHAR(100)`)
pub const DEFAULT_TEXT_WIDTH: usize = 100;

// ============================================================================
// FLATTENED RECORD
// ============================================================================

/// One row per (project, customer) with the newest value of each column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedRecord {
    pub project_id: i64,
    pub customer_id: i64,
    pub customer_email: Option<String>,
    pub avg_message_volume: Option<Decimal>,
    pub estimated_client_volume_usd: Option<Decimal>,
    pub plan: Option<String>,
    pub interested_in_product: Option<String>,
}

impl FlattenedRecord {
    pub fn new(project_id: i64, customer_id: i64) -> Self {
        FlattenedRecord {
            project_id,
            customer_id,
            customer_email: None,
            avg_message_volume: None,
            estimated_client_volume_usd: None,
            plan: None,
            interested_in_product: None,
        }
    }

    fn set(&mut self, column: OutputColumn, value: FieldValue) {
        match (column, value) {
            (OutputColumn::CustomerEmail, FieldValue::Text(t)) => self.customer_email = Some(t),
            (OutputColumn::Plan, FieldValue::Text(t)) => self.plan = Some(t),
            (OutputColumn::InterestedInProduct, FieldValue::Text(t)) => {
                self.interested_in_product = Some(t)
            }
            (OutputColumn::AvgMessageVolume, FieldValue::Number(n)) => {
                self.avg_message_volume = Some(n)
            }
            (OutputColumn::EstimatedClientVolumeUsd, FieldValue::Number(n)) => {
                self.estimated_client_volume_usd = Some(n)
            }
            (column, value) => {
                warn!("Column {} cannot hold {:?}", column.name(), value);
            }
        }
    }

    /// Cut text columns down to `width` characters
    pub fn truncate_text(&mut self, width: usize) {
        for field in [
            &mut self.customer_email,
            &mut self.plan,
            &mut self.interested_in_product,
        ] {
            if let Some(text) = field {
                if text.chars().count() > width {
                    *text = text.chars().take(width).collect();
                }
            }
        }
    }
}

impl fmt::Display for FlattenedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "NULL".to_string(), |v| v.to_string())
        }

        write!(
            f,
            "({}, {}, {}, {}, {}, {}, {})",
            self.project_id,
            self.customer_id,
            show(&self.customer_email),
            show(&self.avg_message_volume),
            show(&self.estimated_client_volume_usd),
            show(&self.plan),
            show(&self.interested_in_product),
        )
    }
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlattenReport {
    pub properties: usize,
    pub duplicate_property_ids: usize,
    pub values_seen: usize,
    pub orphan_values: usize,
    pub superseded_values: usize,

    /// Distinct (project, customer, label) groups after latest-wins
    pub groups: usize,
    pub ignored_labels: usize,
    pub null_values: usize,
    pub unparseable_numbers: usize,
    pub unmatched_email_contents: usize,
    pub records_before_filter: usize,
    pub records_after_filter: usize,
}

impl FlattenReport {
    pub fn summary(&self) -> String {
        format!(
            "{} values ({} orphaned, {} superseded) → {} customer rows → {} qualified",
            self.values_seen,
            self.orphan_values,
            self.superseded_values,
            self.records_before_filter,
            self.records_after_filter
        )
    }

    fn note_failure(&mut self, err: &ValueError) {
        match err {
            ValueError::Null => self.null_values += 1,
            ValueError::NotANumber(_) | ValueError::Overflow(_) => self.unparseable_numbers += 1,
            ValueError::NoEmailMarker => self.unmatched_email_contents += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlattenOutput {
    pub records: Vec<FlattenedRecord>,
    pub report: FlattenReport,
}

// ============================================================================
// FLATTENER
// ============================================================================

/// A transformed value competing for a column
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    priority: u8,
    created_at: NaiveDateTime,
    value: FieldValue,
}

pub struct Flattener {
    pub catalog: LabelCatalog,
    pub rules: MarketingRules,

    /// Maximum characters kept in text columns (default: 100)
    pub text_width: usize,
}

impl Flattener {
    /// Create flattener with the marketing labels and default rules
    pub fn new() -> Self {
        Flattener {
            catalog: LabelCatalog::new(),
            rules: MarketingRules::default(),
            text_width: DEFAULT_TEXT_WIDTH,
        }
    }

    pub fn with_rules(rules: MarketingRules) -> Self {
        Flattener {
            rules,
            ..Self::new()
        }
    }

    /// Join values to properties; orphans are dropped, first duplicate id wins
    pub fn join<'a>(
        &self,
        properties: &'a [Property],
        values: &'a [PropertyValue],
        report: &mut FlattenReport,
    ) -> Vec<JoinedValue<'a>> {
        let mut by_id: HashMap<i64, &Property> = HashMap::with_capacity(properties.len());
        for property in properties {
            if by_id.contains_key(&property.id) {
                warn!("Duplicate property id {} ignored", property.id);
                report.duplicate_property_ids += 1;
                continue;
            }
            by_id.insert(property.id, property);
        }

        let mut joined = Vec::with_capacity(values.len());
        for value in values {
            match by_id.get(&value.property_id) {
                Some(&property) => joined.push(JoinedValue { property, value }),
                None => {
                    debug!(
                        "Dropping value {} with unknown property_id {}",
                        value.id, value.property_id
                    );
                    report.orphan_values += 1;
                }
            }
        }

        report.properties = by_id.len();
        report.values_seen = values.len();
        joined
    }

    /// Join, select latest and pivot; no filtering, sorted by (project, customer)
    pub fn pivot(
        &self,
        properties: &[Property],
        values: &[PropertyValue],
    ) -> (Vec<FlattenedRecord>, FlattenReport) {
        let mut report = FlattenReport::default();
        let joined = self.join(properties, values, &mut report);
        let selection = select_latest(joined);
        report.superseded_values = selection.superseded;
        report.groups = selection.group_count();

        let mut pairs: BTreeMap<(i64, i64), HashMap<OutputColumn, Candidate>> = BTreeMap::new();

        for (key, latest) in &selection.latest {
            let columns = pairs.entry((key.project_id, key.customer_id)).or_default();

            let Some(definition) = self.catalog.get(key.label) else {
                report.ignored_labels += 1;
                continue;
            };

            let value = match definition.transform.apply(latest.value.value.as_deref()) {
                Ok(value) => value,
                Err(err) => {
                    debug!(
                        "Project {} customer {} label {:?}: {}",
                        key.project_id, key.customer_id, key.label, err
                    );
                    report.note_failure(&err);
                    continue;
                }
            };

            let candidate = Candidate {
                priority: definition.priority,
                created_at: latest.value.created_at,
                value,
            };

            let replace = columns
                .get(&definition.column)
                .map_or(true, |current| candidate > *current);
            if replace {
                columns.insert(definition.column, candidate);
            }
        }

        let records: Vec<FlattenedRecord> = pairs
            .into_iter()
            .map(|((project_id, customer_id), columns)| {
                let mut record = FlattenedRecord::new(project_id, customer_id);
                for (column, candidate) in columns {
                    record.set(column, candidate.value);
                }
                record
            })
            .collect();

        report.records_before_filter = records.len();
        (records, report)
    }

    /// The full pipeline: pivot, filter with the marketing rules, shape text
    pub fn flatten(&self, properties: &[Property], values: &[PropertyValue]) -> FlattenOutput {
        let (records, mut report) = self.pivot(properties, values);

        let records: Vec<FlattenedRecord> = records
            .into_iter()
            .filter(|record| {
                if self.rules.matches(record) {
                    return true;
                }
                debug!(
                    "Project {} customer {} filtered out: {}",
                    record.project_id,
                    record.customer_id,
                    self.rules.failed_clauses(record).join(", ")
                );
                false
            })
            .map(|mut record| {
                record.truncate_text(self.text_width);
                record
            })
            .collect();

        report.records_after_filter = records.len();
        FlattenOutput { records, report }
    }
}

impl Default for Flattener {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute `projects_for_marketing` with the default labels and rules
pub fn flatten_for_marketing(
    properties: &[Property],
    values: &[PropertyValue],
) -> Vec<FlattenedRecord> {
    Flattener::new().flatten(properties, values).records
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::parse_timestamp;
    use std::str::FromStr;

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    fn catalog() -> Vec<Property> {
        vec![
            Property::new(1, 10, "plan"),
            Property::new(2, 10, "avg_message_volume"),
            Property::new(3, 10, "estimated_client_volume_usd"),
            Property::new(4, 10, "interested_in_product"),
            Property::new(5, 10, "email"),
        ]
    }

    /// Values for customer 100, one per property, distinct timestamps
    fn happy_values(avg: &str) -> Vec<PropertyValue> {
        let raw = [
            (1, "Free"),
            (2, avg),
            (3, "2000.00"),
            (4, "YES"),
            (5, "a@b.com"),
        ];
        raw.iter()
            .enumerate()
            .map(|(i, (property_id, v))| {
                let at = format!("2024-01-0{} 12:00:00", i + 1);
                PropertyValue::new(
                    i as i64 + 1,
                    100,
                    *property_id,
                    Some(v),
                    parse_timestamp(&at).unwrap(),
                )
            })
            .collect()
    }

    fn add_value(values: &mut Vec<PropertyValue>, property_id: i64, raw: Option<&str>, at: &str) {
        let id = values.len() as i64 + 1;
        values.push(PropertyValue::new(
            id,
            100,
            property_id,
            raw,
            parse_timestamp(at).unwrap(),
        ));
    }

    #[test]
    fn test_happy_path_scenario() {
        let output = Flattener::new().flatten(&catalog(), &happy_values("6000.00"));

        assert_eq!(
            output.records,
            vec![FlattenedRecord {
                project_id: 10,
                customer_id: 100,
                customer_email: Some("a@b.com".to_string()),
                avg_message_volume: Some(dec("6000.00")),
                estimated_client_volume_usd: Some(dec("2000.00")),
                plan: Some("Free".to_string()),
                interested_in_product: Some("YES".to_string()),
            }]
        );
        assert_eq!(
            output.records[0].to_string(),
            "(10, 100, a@b.com, 6000.00, 2000.00, Free, YES)"
        );
        assert_eq!(output.report.records_after_filter, 1);
        assert_eq!(output.report.groups, 5);
    }

    #[test]
    fn test_low_message_volume_filtered_out() {
        let records = flatten_for_marketing(&catalog(), &happy_values("4000.00"));
        assert!(records.is_empty());
    }

    #[test]
    fn test_latest_plan_wins() {
        let mut values = happy_values("6000.00");
        // Remove the original plan value, then record Paid before Free
        values.retain(|v| v.property_id != 1);
        add_value(&mut values, 1, Some("Paid"), "2023-06-01 00:00:00");
        add_value(&mut values, 1, Some("Free"), "2024-06-01 00:00:00");

        let records = flatten_for_marketing(&catalog(), &values);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].plan.as_deref(), Some("Free"));

        // And the reverse makes the customer unqualified
        let mut values = happy_values("6000.00");
        values.retain(|v| v.property_id != 1);
        add_value(&mut values, 1, Some("Free"), "2023-06-01 00:00:00");
        add_value(&mut values, 1, Some("Paid"), "2024-06-01 00:00:00");

        assert!(flatten_for_marketing(&catalog(), &values).is_empty());
    }

    #[test]
    fn test_orphan_values_contribute_nothing() {
        let mut values = happy_values("6000.00");
        // property 99 does not exist; it would otherwise look like a newer plan
        add_value(&mut values, 99, Some("Paid"), "2030-01-01 00:00:00");

        let output = Flattener::new().flatten(&catalog(), &values);

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.report.orphan_values, 1);
        assert_eq!(output.records[0].plan.as_deref(), Some("Free"));
    }

    #[test]
    fn test_email_extracted_from_contents() {
        let mut properties = catalog();
        properties.retain(|p| p.label != "email");
        properties.push(Property::new(6, 10, "email_contents"));

        let mut values = happy_values("6000.00");
        values.retain(|v| v.property_id != 5);
        add_value(
            &mut values,
            6,
            Some("SUBJECT: hi FROM:alice@example.com CONTENTS body"),
            "2024-01-09 00:00:00",
        );

        let records = flatten_for_marketing(&properties, &values);
        assert_eq!(records[0].customer_email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_direct_email_beats_contents() {
        let mut properties = catalog();
        properties.push(Property::new(6, 10, "email_contents"));

        let mut values = happy_values("6000.00");
        add_value(
            &mut values,
            6,
            Some("FROM:zed@example.com CONTENTS"),
            "2030-01-01 00:00:00",
        );

        let records = flatten_for_marketing(&properties, &values);
        assert_eq!(records[0].customer_email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_contents_used_when_direct_email_null() {
        let mut properties = catalog();
        properties.push(Property::new(6, 10, "email_contents"));

        let mut values = happy_values("6000.00");
        add_value(&mut values, 5, None, "2030-01-01 00:00:00");
        add_value(
            &mut values,
            6,
            Some("FROM:zed@example.com CONTENTS"),
            "2024-01-09 00:00:00",
        );

        let records = flatten_for_marketing(&properties, &values);
        assert_eq!(records[0].customer_email.as_deref(), Some("zed@example.com"));
    }

    #[test]
    fn test_later_direct_email_label_wins() {
        let mut properties = catalog();
        properties.push(Property::new(7, 10, "e-mail"));

        let mut values = happy_values("6000.00");
        add_value(&mut values, 7, Some("new@b.com"), "2030-01-01 00:00:00");

        let records = flatten_for_marketing(&properties, &values);
        assert_eq!(records[0].customer_email.as_deref(), Some("new@b.com"));
    }

    #[test]
    fn test_direct_email_labels_same_timestamp_greater_value_wins() {
        let mut properties = catalog();
        properties.push(Property::new(7, 10, "e-mail"));

        // "email" (property 5) was recorded at 2024-01-05 12:00:00 as a@b.com
        let mut greater = happy_values("6000.00");
        add_value(&mut greater, 7, Some("zoe@b.com"), "2024-01-05 12:00:00");
        let records = flatten_for_marketing(&properties, &greater);
        assert_eq!(records[0].customer_email.as_deref(), Some("zoe@b.com"));

        let mut lesser = happy_values("6000.00");
        add_value(&mut lesser, 7, Some("0ne@b.com"), "2024-01-05 12:00:00");
        let records = flatten_for_marketing(&properties, &lesser);
        assert_eq!(records[0].customer_email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_unmatched_contents_leaves_email_empty() {
        let properties = vec![
            Property::new(1, 10, "plan"),
            Property::new(2, 10, "avg_message_volume"),
            Property::new(3, 10, "estimated_client_volume_usd"),
            Property::new(4, 10, "interested_in_product"),
            Property::new(5, 10, "email_contents"),
        ];
        let mut values = happy_values("6000.00");
        values.retain(|v| v.property_id != 5);
        add_value(&mut values, 5, Some("no sender here"), "2024-01-09 00:00:00");

        let output = Flattener::new().flatten(&properties, &values);

        // Still qualifies; the email simply stays empty
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].customer_email, None);
        assert_eq!(output.report.unmatched_email_contents, 1);
    }

    #[test]
    fn test_unparseable_number_fails_closed() {
        let output = Flattener::new().flatten(&catalog(), &happy_values("lots"));

        assert!(output.records.is_empty());
        assert_eq!(output.report.unparseable_numbers, 1);
        assert_eq!(output.report.records_before_filter, 1);
    }

    #[test]
    fn test_missing_label_fails_filter() {
        let mut values = happy_values("6000.00");
        values.retain(|v| v.property_id != 4);

        assert!(flatten_for_marketing(&catalog(), &values).is_empty());
    }

    #[test]
    fn test_unknown_labels_ignored() {
        let mut properties = catalog();
        properties.push(Property::new(8, 10, "favourite_color"));
        let mut values = happy_values("6000.00");
        add_value(&mut values, 8, Some("teal"), "2024-01-09 00:00:00");

        let output = Flattener::new().flatten(&properties, &values);

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.report.ignored_labels, 1);
    }

    #[test]
    fn test_pivot_keeps_unqualified_rows() {
        let mut values = happy_values("4000.00");
        // A second customer with nothing but a plan still gets a row
        values.push(PropertyValue::new(
            50,
            200,
            1,
            Some("Paid"),
            parse_timestamp("2024-01-01").unwrap(),
        ));

        let (records, report) = Flattener::new().pivot(&catalog(), &values);

        assert_eq!(records.len(), 2);
        assert_eq!(report.records_before_filter, 2);
        assert_eq!(records[0].customer_id, 100);
        assert_eq!(records[0].avg_message_volume, Some(dec("4000.00")));
        assert_eq!(records[1].customer_id, 200);
        assert_eq!(records[1].plan.as_deref(), Some("Paid"));
    }

    #[test]
    fn test_output_sorted_by_project_then_customer() {
        let mut properties = catalog();
        for (offset, p) in catalog().iter().enumerate() {
            properties.push(Property::new(20 + offset as i64, 5, &p.label));
        }

        let mut values = Vec::new();
        for (in_project_five, customer) in [(false, 300_i64), (true, 100), (false, 200)] {
            for (i, v) in happy_values("6000.00").into_iter().enumerate() {
                let property_id = if in_project_five {
                    20 + i as i64
                } else {
                    v.property_id
                };
                values.push(PropertyValue {
                    id: values.len() as i64 + 1,
                    customer_id: customer,
                    property_id,
                    ..v
                });
            }
        }

        let records = flatten_for_marketing(&properties, &values);
        let keys: Vec<(i64, i64)> = records
            .iter()
            .map(|r| (r.project_id, r.customer_id))
            .collect();

        assert_eq!(keys, vec![(5, 100), (10, 200), (10, 300)]);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let flattener = Flattener::new();
        let properties = catalog();
        let values = happy_values("6000.00");

        let first = flattener.flatten(&properties, &values);
        let second = flattener.flatten(&properties, &values);

        assert_eq!(first.records, second.records);
        assert_eq!(first.report, second.report);
    }

    #[test]
    fn test_duplicate_property_id_first_wins() {
        let mut properties = catalog();
        properties.push(Property::new(1, 10, "renamed_plan"));

        let output = Flattener::new().flatten(&properties, &happy_values("6000.00"));

        assert_eq!(output.report.duplicate_property_ids, 1);
        assert_eq!(output.records[0].plan.as_deref(), Some("Free"));
    }

    #[test]
    fn test_long_email_truncated() {
        let mut values = happy_values("6000.00");
        let long = format!("{}@b.com", "x".repeat(120));
        add_value(&mut values, 5, Some(&long), "2030-01-01 00:00:00");

        let records = flatten_for_marketing(&catalog(), &values);
        let email = records[0].customer_email.as_deref().unwrap();

        assert_eq!(email.chars().count(), DEFAULT_TEXT_WIDTH);
        assert!(email.starts_with("xxx"));
    }

    #[test]
    fn test_custom_rules() {
        let rules = MarketingRules {
            plan: "Paid".to_string(),
            ..MarketingRules::default()
        };
        let mut values = happy_values("6000.00");
        add_value(&mut values, 1, Some("Paid"), "2030-01-01 00:00:00");

        let output = Flattener::with_rules(rules).flatten(&catalog(), &values);

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].plan.as_deref(), Some("Paid"));
    }
}
