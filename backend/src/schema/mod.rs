//! Entity schemas: the per-entity rule sets driving header mapping and row validation.
//!
//! A schema is plain configuration. The pipeline stays entity-agnostic and
//! only ever reads an [`EntitySchema`]; supporting a new kind of upload means
//! writing a new schema, not new pipeline code.
//!
//! # Built-in schemas
//!
//! | Entity        | Required columns                       | Identity        |
//! |---------------|----------------------------------------|-----------------|
//! | `team-member` | firstName, lastName, email, dailyRate  | email (+ name)  |
//! | `timesheet`   | email, date                            | email + date    |
//!
//! # Custom schemas
//!
//! Definitions can be loaded from JSON. They are checked against the embedded
//! `schemas/entity-schema.json` (JSON Schema draft 7) before deserialization,
//! so a malformed file reports every problem at once.
//!
//! ```rust,ignore
//! let schema = EntitySchema::from_json(&std::fs::read_to_string("members.json")?)?;
//! println!("{}", schema.template_csv());
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{SchemaError, SchemaResult};
use crate::models::EntityKind;

const DEFINITION_SCHEMA: &str = include_str!("../../schemas/entity-schema.json");

// =============================================================================
// Field Definitions
// =============================================================================

/// Type and constraints of a canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text, optionally length-limited.
    Text {
        #[serde(default)]
        max_len: Option<usize>,
    },

    /// Email address, stored lowercased.
    Email,

    /// Decimal number with hard bounds and an optional soft ceiling.
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        /// Values above this are accepted with a warning.
        #[serde(default)]
        warn_above: Option<f64>,
        #[serde(default)]
        integer: bool,
    },

    /// Calendar date, `YYYY-MM-DD` or `DD/MM/YYYY`.
    Date {
        #[serde(default)]
        not_before: Option<NaiveDate>,
        #[serde(default)]
        not_after: Option<NaiveDate>,
        /// Must fall inside the import's reporting period, when one is given.
        #[serde(default)]
        period_bound: bool,
    },

    /// One of a closed set of codes (case-insensitive).
    Enum {
        values: Vec<String>,
        /// Accepted spellings mapped to a canonical value. Using one yields a warning.
        #[serde(default)]
        aliases: BTreeMap<String, String>,
    },
}

/// One canonical field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Canonical key (e.g. `firstName`).
    pub key: String,
    /// Human label, also accepted as a header.
    #[serde(default)]
    pub label: String,
    /// Other header spellings that map to this field.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    fn new(key: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            aliases: Vec::new(),
            required: false,
            kind,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Name shown in messages.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.key
        } else {
            &self.label
        }
    }
}

/// Severity of a cross-field rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    #[default]
    Warning,
}

/// Rules spanning several fields of the same row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrossFieldRule {
    /// At least one of the fields must be present. Always an error.
    AtLeastOne {
        fields: Vec<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// At most one of the fields may be present.
    Exclusive {
        fields: Vec<String>,
        #[serde(default)]
        severity: Severity,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Natural identity of a record, used for duplicate detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// Fields forming the authoritative key, compared after normalization.
    pub key_fields: Vec<String>,
    /// Fields joined into a full name for the fallback match. Empty disables it.
    #[serde(default)]
    pub name_fields: Vec<String>,
    /// Field reported as `matchedEmail`.
    #[serde(default)]
    pub email_field: Option<String>,
}

/// Inclusive date range a timesheet import reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if end < start {
            return Err(format!("period end {} is before start {}", end, start));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

// =============================================================================
// Entity Schema
// =============================================================================

/// Complete rule set for one kind of upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity: EntityKind,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub rules: Vec<CrossFieldRule>,
    pub identity: IdentitySpec,
}

impl EntitySchema {
    /// Built-in schema for an entity kind.
    pub fn builtin(entity: EntityKind) -> Self {
        match entity {
            EntityKind::TeamMember => Self::team_member(),
            EntityKind::Timesheet => Self::timesheet(),
        }
    }

    /// Vendor team members.
    pub fn team_member() -> Self {
        Self {
            entity: EntityKind::TeamMember,
            description: "Team members of a vendor".to_string(),
            fields: vec![
                FieldSpec::new("firstName", "First Name", FieldKind::Text { max_len: Some(100) })
                    .required()
                    .aliases(&["first", "given name", "forename", "prenom", "prénom"]),
                FieldSpec::new("lastName", "Last Name", FieldKind::Text { max_len: Some(100) })
                    .required()
                    .aliases(&["last", "surname", "family name", "nom"]),
                FieldSpec::new("email", "Email", FieldKind::Email)
                    .required()
                    .aliases(&["e-mail", "email address", "mail", "work email"]),
                FieldSpec::new(
                    "dailyRate",
                    "Daily Rate",
                    FieldKind::Number {
                        min: Some(0.0),
                        max: None,
                        warn_above: Some(5000.0),
                        integer: false,
                    },
                )
                .required()
                .aliases(&["day rate", "rate per day", "tjm"]),
                FieldSpec::new("role", "Role", FieldKind::Text { max_len: Some(100) })
                    .aliases(&["job title", "title", "position"]),
                FieldSpec::new(
                    "startDate",
                    "Start Date",
                    FieldKind::Date {
                        not_before: None,
                        not_after: None,
                        period_bound: false,
                    },
                )
                .aliases(&["start", "onboarding date"]),
                FieldSpec::new("phone", "Phone", FieldKind::Text { max_len: Some(40) })
                    .aliases(&["phone number", "telephone", "mobile"]),
            ],
            rules: Vec::new(),
            identity: IdentitySpec {
                key_fields: vec!["email".to_string()],
                name_fields: vec!["firstName".to_string(), "lastName".to_string()],
                email_field: Some("email".to_string()),
            },
        }
    }

    /// Daily timesheet entries of vendor team members.
    pub fn timesheet() -> Self {
        let time_off_aliases: BTreeMap<String, String> = [
            ("vacation", "PTO"),
            ("leave", "PTO"),
            ("annual leave", "PTO"),
            ("paid time off", "PTO"),
            ("sick leave", "SICK"),
            ("illness", "SICK"),
            ("public holiday", "HOLIDAY"),
            ("bank holiday", "HOLIDAY"),
            ("unpaid leave", "UNPAID"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            entity: EntityKind::Timesheet,
            description: "Daily time entries of team members".to_string(),
            fields: vec![
                FieldSpec::new("email", "Email", FieldKind::Email)
                    .required()
                    .aliases(&["member email", "employee email", "consultant email", "e-mail", "email address"]),
                FieldSpec::new(
                    "date",
                    "Date",
                    FieldKind::Date {
                        not_before: None,
                        not_after: None,
                        period_bound: true,
                    },
                )
                .required()
                .aliases(&["day", "work date", "entry date"]),
                FieldSpec::new(
                    "hours",
                    "Hours",
                    FieldKind::Number {
                        min: Some(0.0),
                        max: Some(24.0),
                        warn_above: Some(12.0),
                        integer: false,
                    },
                )
                .aliases(&["hours worked", "time", "duration", "hrs"]),
                FieldSpec::new(
                    "timeOffCode",
                    "Time Off Code",
                    FieldKind::Enum {
                        values: ["PTO", "SICK", "HOLIDAY", "UNPAID", "TRAINING"]
                            .iter()
                            .map(|v| v.to_string())
                            .collect(),
                        aliases: time_off_aliases,
                    },
                )
                .aliases(&["time off", "absence", "absence code", "leave type"]),
                FieldSpec::new("notes", "Notes", FieldKind::Text { max_len: Some(500) })
                    .aliases(&["comment", "comments", "description"]),
            ],
            rules: vec![
                CrossFieldRule::AtLeastOne {
                    fields: vec!["hours".to_string(), "timeOffCode".to_string()],
                    message: Some("Either hours or a time-off code is required".to_string()),
                },
                CrossFieldRule::Exclusive {
                    fields: vec!["hours".to_string(), "timeOffCode".to_string()],
                    severity: Severity::Warning,
                    message: Some("Both hours and a time-off code are set".to_string()),
                },
            ],
            identity: IdentitySpec {
                key_fields: vec!["email".to_string(), "date".to_string()],
                name_fields: Vec::new(),
                email_field: Some("email".to_string()),
            },
        }
    }

    /// Parse a definition from JSON, validating it first.
    pub fn from_json(json: &str) -> SchemaResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Parse a definition from a JSON value, validating it first.
    pub fn from_value(value: &Value) -> SchemaResult<Self> {
        validate_definition(value)?;
        let schema: Self = serde_json::from_value(value.clone())?;
        schema.check_references()?;
        Ok(schema)
    }

    /// Load a definition file.
    pub fn from_file(path: &Path) -> SchemaResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Canonical keys of required fields, in schema order.
    pub fn required_keys(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.key.as_str())
            .collect()
    }

    /// CSV containing only the canonical header row.
    pub fn template_csv(&self) -> String {
        let header: Vec<&str> = self.fields.iter().map(|f| f.key.as_str()).collect();
        format!("{}\n", header.join(","))
    }

    /// Every rule and identity field must name a declared field.
    fn check_references(&self) -> SchemaResult<()> {
        let mut referenced: Vec<&str> = Vec::new();
        for rule in &self.rules {
            match rule {
                CrossFieldRule::AtLeastOne { fields, .. } | CrossFieldRule::Exclusive { fields, .. } => {
                    referenced.extend(fields.iter().map(String::as_str));
                }
            }
        }
        referenced.extend(self.identity.key_fields.iter().map(String::as_str));
        referenced.extend(self.identity.name_fields.iter().map(String::as_str));
        if let Some(ref email) = self.identity.email_field {
            referenced.push(email);
        }

        let unknown: Vec<String> = referenced
            .into_iter()
            .filter(|key| self.field(key).is_none())
            .map(|key| format!("unknown field '{}'", key))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid(unknown))
        }
    }
}

/// Validate a definition against the embedded JSON Schema.
pub fn validate_definition(value: &Value) -> SchemaResult<()> {
    let schema: Value = serde_json::from_str(DEFINITION_SCHEMA)
        .expect("Invalid embedded schema");
    let validator = jsonschema::draft7::new(&schema)
        .map_err(|e| SchemaError::Invalid(vec![format!("Invalid embedded schema: {}", e)]))?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Invalid(errors))
    }
}
