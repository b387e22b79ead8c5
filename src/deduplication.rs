// 🔍 Latest-Wins Selection - One authoritative value per (project, customer, label)
// A customer's property can be recorded many times; only the newest counts.
//
// Tie-break when two rows share the newest create_dte:
//   1. higher PropertyValue id wins
//   2. then the greater value wins (NULL sorts lowest)

use crate::db::{Property, PropertyValue};
use chrono::NaiveDateTime;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

// ============================================================================
// JOINED VALUE
// ============================================================================

/// A property value together with the property it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedValue<'a> {
    pub property: &'a Property,
    pub value: &'a PropertyValue,
}

impl<'a> JoinedValue<'a> {
    pub fn key(&self) -> GroupKey<'a> {
        GroupKey {
            project_id: self.property.project_id,
            customer_id: self.value.customer_id,
            label: &self.property.label,
        }
    }

    /// Ordering used to pick the newest value in a group
    pub fn recency(&self) -> (NaiveDateTime, i64, Option<&'a str>) {
        (self.value.created_at, self.value.id, self.value.value.as_deref())
    }
}

/// Grouping key for latest-wins selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey<'a> {
    pub project_id: i64,
    pub customer_id: i64,
    pub label: &'a str,
}

// ============================================================================
// SELECTION RESULT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct LatestSelection<'a> {
    /// Winning value per group
    pub latest: HashMap<GroupKey<'a>, JoinedValue<'a>>,

    /// Values that lost to a newer one in the same group
    pub superseded: usize,
}

impl<'a> LatestSelection<'a> {
    pub fn group_count(&self) -> usize {
        self.latest.len()
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Keep the newest value of every (project, customer, label) group
pub fn select_latest<'a, I>(joined: I) -> LatestSelection<'a>
where
    I: IntoIterator<Item = JoinedValue<'a>>,
{
    let mut selection = LatestSelection::default();

    for candidate in joined {
        match selection.latest.entry(candidate.key()) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                selection.superseded += 1;
                if candidate.recency() > slot.get().recency() {
                    slot.insert(candidate);
                }
            }
        }
    }

    selection
}

// ============================================================================
// TESTS
// ============================================================================
