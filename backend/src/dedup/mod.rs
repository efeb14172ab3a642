//! Duplicate Detector: within-file and against-store classification.
//!
//! Two passes over canonicalized rows:
//!
//! 1. **Within-file** - a seen-set keyed by `(scope, identity key)` is filled
//!    in row order. Later occurrences point back at the first one, never
//!    forward.
//! 2. **Against store** - rows not already flagged are looked up in a
//!    [`StoreIndex`] built once per run. An exact key match (normalized email)
//!    is authoritative; without one, the configured [`MatchStrategy`] may fall
//!    back to the normalized full name.
//!
//! The fuzzy fallback accepts substring containment in either direction. It
//! over-matches short names and means little for scripts without word
//! boundaries; use [`MatchStrategy::Exact`] or [`MatchStrategy::Name`] when
//! that matters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::models::{CanonicalData, DuplicateInfo};
use crate::schema::IdentitySpec;
use crate::store::StoredRecord;

/// How far the against-store pass goes beyond the exact key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Identity key only.
    Exact,
    /// Identity key, then exact normalized full name.
    Name,
    /// Identity key, then exact or contained normalized full name.
    #[default]
    Fuzzy,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Name => "name",
            Self::Fuzzy => "fuzzy",
        })
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" | "strict" => Ok(Self::Exact),
            "name" => Ok(Self::Name),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(format!(
                "unknown match strategy '{}' (expected exact, name or fuzzy)",
                other
            )),
        }
    }
}

/// Normalized identity of a row or record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// All key fields present, normalized and joined.
    pub key: Option<String>,
    /// Normalized full name, when name fields are configured and present.
    pub name: Option<String>,
    /// Email as reported in `matchedEmail`.
    pub email: Option<String>,
}

impl Identity {
    /// Key used for the within-file seen-set.
    fn file_key(&self) -> Option<String> {
        self.key
            .clone()
            .or_else(|| self.name.as_ref().map(|n| format!("name:{}", n)))
    }
}

/// Lowercase and collapse internal whitespace.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn field_text(data: &CanonicalData, key: &str) -> Option<String> {
    let text = match data.get(key)? {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    let normalized = normalize_text(&text);
    (!normalized.is_empty()).then_some(normalized)
}

/// Compute the identity of canonical data.
pub fn identity_of(data: &CanonicalData, spec: &IdentitySpec) -> Identity {
    let key_parts: Option<Vec<String>> = spec
        .key_fields
        .iter()
        .map(|f| field_text(data, f))
        .collect();

    let name_parts: Vec<String> = spec
        .name_fields
        .iter()
        .filter_map(|f| field_text(data, f))
        .collect();

    Identity {
        key: key_parts.map(|parts| parts.join("|")),
        name: (!name_parts.is_empty()).then(|| name_parts.join(" ")),
        email: spec.email_field.as_deref().and_then(|f| field_text(data, f)),
    }
}

/// A persisted record as seen by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    pub id: String,
    pub identity: Identity,
}

/// Lookup index over the persisted records of one scope.
#[derive(Debug, Clone, Default)]
pub struct StoreIndex {
    by_key: HashMap<String, usize>,
    records: Vec<IndexedRecord>,
}

impl StoreIndex {
    /// Build the index once for a run.
    pub fn build(records: &[StoredRecord], spec: &IdentitySpec) -> Self {
        let mut index = Self::default();
        for record in records {
            let identity = identity_of(&record.fields, spec);
            let position = index.records.len();
            if let Some(ref key) = identity.key {
                index.by_key.entry(key.clone()).or_insert(position);
            }
            index.records.push(IndexedRecord {
                id: record.id.to_string(),
                identity,
            });
        }
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact key lookup.
    pub fn by_key(&self, key: &str) -> Option<&IndexedRecord> {
        self.by_key.get(key).map(|&i| &self.records[i])
    }

    /// Find the record a row collides with, if any.
    pub fn find(&self, identity: &Identity, strategy: MatchStrategy) -> Option<&IndexedRecord> {
        if let Some(found) = identity.key.as_deref().and_then(|k| self.by_key(k)) {
            return Some(found);
        }

        let name = identity.name.as_deref()?;
        match strategy {
            MatchStrategy::Exact => None,
            MatchStrategy::Name => self
                .records
                .iter()
                .find(|r| r.identity.name.as_deref() == Some(name)),
            MatchStrategy::Fuzzy => self
                .records
                .iter()
                .find(|r| r.identity.name.as_deref() == Some(name))
                .or_else(|| {
                    self.records.iter().find(|r| {
                        r.identity
                            .name
                            .as_deref()
                            .is_some_and(|stored| stored.contains(name) || name.contains(stored))
                    })
                }),
        }
    }
}

/// Classify every row. Output is aligned with `rows`.
///
/// `rows` must be in file order: first-occurrence attribution depends on it.
pub fn detect_duplicates(
    rows: &[(usize, &CanonicalData)],
    scope: &str,
    spec: &IdentitySpec,
    index: &StoreIndex,
    strategy: MatchStrategy,
) -> Vec<Option<DuplicateInfo>> {
    let mut seen: HashMap<(String, String), usize> = HashMap::new();

    rows.iter()
        .map(|(row_number, data)| {
            let identity = identity_of(data, spec);

            if let Some(key) = identity.file_key() {
                match seen.get(&(scope.to_string(), key.clone())) {
                    Some(&first) => {
                        return Some(DuplicateInfo::in_file(first, identity.email.clone()));
                    }
                    None => {
                        seen.insert((scope.to_string(), key), *row_number);
                    }
                }
            }

            index
                .find(&identity, strategy)
                .map(|record| DuplicateInfo::in_store(record.id.clone(), record.identity.email.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DuplicateKind, EntityKind};
    use crate::schema::EntitySchema;
    use serde_json::json;

    fn member(first: &str, last: &str, email: &str) -> CanonicalData {
        let mut data = CanonicalData::new();
        data.insert("firstName".into(), json!(first));
        data.insert("lastName".into(), json!(last));
        if !email.is_empty() {
            data.insert("email".into(), json!(email));
        }
        data
    }

    fn stored(first: &str, last: &str, email: &str) -> StoredRecord {
        StoredRecord::new(EntityKind::TeamMember, "vendor-1", member(first, last, email), None)
    }

    fn identity() -> IdentitySpec {
        EntitySchema::team_member().identity
    }

    #[test]
    fn test_first_occurrence_attribution() {
        let a = member("Ada", "Lovelace", "ada@example.com");
        let b = member("Ada", "Lovelace", "ADA@example.com ");
        let c = member("Ada", "L.", "ada@example.com");
        let rows = vec![(2, &a), (3, &b), (4, &c)];

        let result = detect_duplicates(&rows, "vendor-1", &identity(), &StoreIndex::default(), MatchStrategy::Fuzzy);

        assert!(result[0].is_none());
        for info in &result[1..] {
            let info = info.as_ref().unwrap();
            assert_eq!(info.kind, DuplicateKind::File);
            assert_eq!(info.matched_row_number, Some(2));
        }
    }

    #[test]
    fn test_email_match_against_store() {
        let index = StoreIndex::build(&[stored("Grace", "Hopper", "grace@navy.mil")], &identity());
        let row = member("G.", "Hopper", "Grace@Navy.mil");

        let result = detect_duplicates(&[(2, &row)], "vendor-1", &identity(), &index, MatchStrategy::Exact);
        let info = result[0].as_ref().unwrap();
        assert_eq!(info.kind, DuplicateKind::Database);
        assert_eq!(info.matched_email.as_deref(), Some("grace@navy.mil"));
        assert!(info.matched_record_id.is_some());
    }

    #[test]
    fn test_fuzzy_name_fallback() {
        let index = StoreIndex::build(&[stored("Grace Brewster", "Hopper", "grace@navy.mil")], &identity());
        let row = member("grace", "HOPPER", "ghopper@example.com");

        let exact = detect_duplicates(&[(2, &row)], "v", &identity(), &index, MatchStrategy::Exact);
        assert!(exact[0].is_none());

        let name = detect_duplicates(&[(2, &row)], "v", &identity(), &index, MatchStrategy::Name);
        assert!(name[0].is_none());

        // "grace hopper" is not contained in "grace brewster hopper" either way
        let fuzzy = detect_duplicates(&[(2, &row)], "v", &identity(), &index, MatchStrategy::Fuzzy);
        assert!(fuzzy[0].is_none());

        let row = member("Brewster", "Hopper", "other@example.com");
        let fuzzy = detect_duplicates(&[(2, &row)], "v", &identity(), &index, MatchStrategy::Fuzzy);
        assert_eq!(fuzzy[0].as_ref().unwrap().kind, DuplicateKind::Database);
    }

    #[test]
    fn test_exact_name_match() {
        let index = StoreIndex::build(&[stored("Ada", "Lovelace", "ada@old.org")], &identity());
        let row = member("  ada ", "lovelace", "ada@new.org");

        let result = detect_duplicates(&[(2, &row)], "v", &identity(), &index, MatchStrategy::Name);
        assert_eq!(result[0].as_ref().unwrap().matched_email.as_deref(), Some("ada@old.org"));
    }

    #[test]
    fn test_file_duplicates_checked_before_store() {
        let index = StoreIndex::build(&[stored("Ada", "Lovelace", "ada@example.com")], &identity());
        let a = member("Ada", "Lovelace", "ada@example.com");
        let b = member("Ada", "Lovelace", "ada@example.com");

        let result = detect_duplicates(&[(2, &a), (3, &b)], "v", &identity(), &index, MatchStrategy::Exact);
        assert_eq!(result[0].as_ref().unwrap().kind, DuplicateKind::Database);
        assert_eq!(result[1].as_ref().unwrap().kind, DuplicateKind::File);
    }

    #[test]
    fn test_composite_timesheet_key() {
        let spec = EntitySchema::timesheet().identity;
        let entry = |email: &str, date: &str| {
            let mut data = CanonicalData::new();
            data.insert("email".into(), json!(email));
            data.insert("date".into(), json!(date));
            data
        };
        let a = entry("a@b.co", "2025-03-14");
        let b = entry("a@b.co", "2025-03-15");
        let c = entry("a@b.co", "2025-03-14");

        let result = detect_duplicates(&[(2, &a), (3, &b), (4, &c)], "v", &spec, &StoreIndex::default(), MatchStrategy::Fuzzy);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        assert_eq!(result[2].as_ref().unwrap().matched_row_number, Some(2));
    }

    #[test]
    fn test_rows_without_identity_are_not_duplicates() {
        let empty = CanonicalData::new();
        let result = detect_duplicates(&[(2, &empty), (3, &empty)], "v", &identity(), &StoreIndex::default(), MatchStrategy::Fuzzy);
        assert!(result.iter().all(Option::is_none));
    }

    #[test]
    fn test_match_strategy_parsing() {
        assert_eq!("Fuzzy".parse::<MatchStrategy>(), Ok(MatchStrategy::Fuzzy));
        assert_eq!("strict".parse::<MatchStrategy>(), Ok(MatchStrategy::Exact));
        assert!("loose".parse::<MatchStrategy>().is_err());
    }
}
