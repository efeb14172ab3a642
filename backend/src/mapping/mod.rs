//! Header Mapper: reconcile variant column names with canonical field keys.
//!
//! Matching ignores case, whitespace and punctuation, so `First Name`,
//! `first_name` and `FirstName` all resolve to `firstName`. Unrecognized
//! headers are kept verbatim and ignored downstream.

use std::collections::HashMap;

use crate::models::{HeaderMapping, HeaderMappingEntry};
use crate::schema::EntitySchema;

/// Result of mapping a header row against a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedHeaders {
    pub mapping: HeaderMapping,
    /// Required canonical keys no header maps to, in schema order.
    pub missing_required: Vec<String>,
}

impl MappedHeaders {
    /// Row validation is meaningless unless this holds.
    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }
}

/// Reduce a header to lowercase alphanumerics.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Map every original header to a canonical key or to itself.
pub fn map_headers(headers: &[String], schema: &EntitySchema) -> MappedHeaders {
    let lookup = alias_lookup(schema);

    let entries: Vec<HeaderMappingEntry> = headers
        .iter()
        .map(|original| match lookup.get(&normalize_header(original)) {
            Some(key) => HeaderMappingEntry {
                original: original.clone(),
                mapped: (*key).to_string(),
                recognized: true,
            },
            None => HeaderMappingEntry {
                original: original.clone(),
                mapped: original.clone(),
                recognized: false,
            },
        })
        .collect();

    let mapping = HeaderMapping { entries };
    let missing_required = schema
        .required_keys()
        .into_iter()
        .filter(|key| !mapping.is_mapped(key))
        .map(String::from)
        .collect();

    MappedHeaders {
        mapping,
        missing_required,
    }
}

/// Normalized spelling to canonical key. Earlier fields win on collisions.
fn alias_lookup(schema: &EntitySchema) -> HashMap<String, &str> {
    let mut lookup = HashMap::new();
    for field in &schema.fields {
        let spellings = std::iter::once(field.key.as_str())
            .chain(std::iter::once(field.label.as_str()))
            .chain(field.aliases.iter().map(String::as_str));

        for spelling in spellings {
            let normalized = normalize_header(spelling);
            if !normalized.is_empty() {
                lookup.entry(normalized).or_insert(field.key.as_str());
            }
        }
    }
    lookup
}
