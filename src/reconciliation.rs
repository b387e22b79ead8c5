// ⚖️ Golden File Reconciliation - Does an output match what we expect?
// Compares a produced file against its expected ("golden") version line by line.
//
// A comparison passes only when every line matches and neither file has
// lines the other lacks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// DISCREPANCIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    /// Both files have the line but the text differs
    Mismatch,

    /// Expected file has the line, actual output does not
    MissingLine,

    /// Actual output has a line the expected file does not
    ExtraLine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiscrepancy {
    /// 1-based line number
    pub line_number: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub category: DiscrepancyCategory,
}

// ============================================================================
// COMPARISON REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub expected_lines: usize,
    pub actual_lines: usize,

    /// Lines present in both files
    pub lines_compared: usize,
    pub matching_lines: usize,
    pub discrepancies: Vec<LineDiscrepancy>,
    pub compared_at: DateTime<Utc>,
}

impl ComparisonReport {
    pub fn is_match(&self) -> bool {
        self.discrepancies.is_empty() && self.expected_lines == self.actual_lines
    }

    /// First discrepancy, if any
    pub fn first_discrepancy(&self) -> Option<&LineDiscrepancy> {
        self.discrepancies.first()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} lines match (expected {} lines, actual {}), {} discrepancies",
            self.matching_lines,
            self.lines_compared,
            self.expected_lines,
            self.actual_lines,
            self.discrepancies.len()
        )
    }
}

// ============================================================================
// COMPARATOR
// ============================================================================

pub struct GoldenComparator {
    /// Ignore trailing spaces and tabs on each line (default: false)
    pub ignore_trailing_whitespace: bool,
}

impl GoldenComparator {
    pub fn new() -> Self {
        GoldenComparator {
            ignore_trailing_whitespace: false,
        }
    }

    fn normalize<'a>(&self, line: &'a str) -> &'a str {
        let line = line.trim_end_matches('\r');
        if self.ignore_trailing_whitespace {
            line.trim_end_matches([' ', '\t'])
        } else {
            line
        }
    }

    /// Compare two texts line by line
    ///
    /// Example:
    /// ```
    /// use lead_pipeline::GoldenComparator;
    ///
    /// let report = GoldenComparator::new().compare_text("a\r\nb\n", "a\nb\n");
    /// assert!(report.is_match());
    /// ```
    pub fn compare_text(&self, actual: &str, expected: &str) -> ComparisonReport {
        let actual_lines: Vec<&str> = actual.lines().map(|l| self.normalize(l)).collect();
        let expected_lines: Vec<&str> = expected.lines().map(|l| self.normalize(l)).collect();

        let lines_compared = actual_lines.len().min(expected_lines.len());
        let mut matching_lines = 0;
        let mut discrepancies = Vec::new();

        for idx in 0..actual_lines.len().max(expected_lines.len()) {
            let line_number = idx + 1;

            match (expected_lines.get(idx), actual_lines.get(idx)) {
                (Some(exp), Some(act)) if exp == act => matching_lines += 1,
                (Some(exp), Some(act)) => discrepancies.push(LineDiscrepancy {
                    line_number,
                    expected: Some(exp.to_string()),
                    actual: Some(act.to_string()),
                    category: DiscrepancyCategory::Mismatch,
                }),
                (Some(exp), None) => discrepancies.push(LineDiscrepancy {
                    line_number,
                    expected: Some(exp.to_string()),
                    actual: None,
                    category: DiscrepancyCategory::MissingLine,
                }),
                (None, Some(act)) => discrepancies.push(LineDiscrepancy {
                    line_number,
                    expected: None,
                    actual: Some(act.to_string()),
                    category: DiscrepancyCategory::ExtraLine,
                }),
                (None, None) => {}
            }
        }

        ComparisonReport {
            expected_lines: expected_lines.len(),
            actual_lines: actual_lines.len(),
            lines_compared,
            matching_lines,
            discrepancies,
            compared_at: Utc::now(),
        }
    }

    pub fn compare_files(&self, actual: &Path, expected: &Path) -> Result<ComparisonReport> {
        let actual_text = fs::read_to_string(actual)
            .with_context(|| format!("Failed to read actual output: {}", actual.display()))?;
        let expected_text = fs::read_to_string(expected)
            .with_context(|| format!("Failed to read expected output: {}", expected.display()))?;

        Ok(self.compare_text(&actual_text, &expected_text))
    }
}

impl Default for GoldenComparator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
