// 🏷️ Marketing Rules - Rules as Data
// Which flattened records count as marketing-qualified leads

use crate::flatten::FlattenedRecord;
use anyhow::{Context as AnyhowContext, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// Every clause must hold; a missing field never satisfies a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketingRules {
    /// `avg_message_volume` must be strictly greater (default: 5000)
    pub avg_message_volume_above: Decimal,

    /// `estimated_client_volume_usd` must be strictly greater (default: 1000)
    pub estimated_client_volume_usd_above: Decimal,

    /// Exact plan name (default: "Free")
    pub plan: String,

    /// Exact interest flag (default: "YES")
    pub interested_in_product: String,
}

impl Default for MarketingRules {
    fn default() -> Self {
        MarketingRules {
            avg_message_volume_above: Decimal::from(5000),
            estimated_client_volume_usd_above: Decimal::from(1000),
            plan: "Free".to_string(),
            interested_in_product: "YES".to_string(),
        }
    }
}

impl MarketingRules {
    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: MarketingRules =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(rules)
    }

    /// Names of the clauses a record fails (empty = qualified)
    pub fn failed_clauses(&self, record: &FlattenedRecord) -> Vec<&'static str> {
        let mut failed = Vec::new();

        if !record
            .avg_message_volume
            .is_some_and(|v| v > self.avg_message_volume_above)
        {
            failed.push("avg_message_volume");
        }

        if !record
            .estimated_client_volume_usd
            .is_some_and(|v| v > self.estimated_client_volume_usd_above)
        {
            failed.push("estimated_client_volume_usd");
        }

        if record.plan.as_deref() != Some(self.plan.as_str()) {
            failed.push("plan");
        }

        if record.interested_in_product.as_deref() != Some(self.interested_in_product.as_str()) {
            failed.push("interested_in_product");
        }

        failed
    }

    pub fn matches(&self, record: &FlattenedRecord) -> bool {
        self.failed_clauses(record).is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
