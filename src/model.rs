use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::traits::ScanError;

/// One dependency instance supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
    pub ecosystem: String, // e.g., "npm", "PyPI", "Maven"
}

impl PackageRef {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        ecosystem: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ecosystem: ecosystem.into(),
        }
    }

    /// All three fields must be non-empty.
    pub fn validate(&self) -> Result<(), ScanError> {
        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("ecosystem", &self.ecosystem),
        ] {
            if value.is_empty() {
                return Err(ScanError::InvalidArgument(format!(
                    "package {field} must not be empty ({}@{} [{}])",
                    self.name, self.version, self.ecosystem
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsvPackage {
    pub name: String,
    pub ecosystem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    pub package: OsvPackage,
    pub version: String,
}

/// Request body of the batch endpoint. Position `i` of the response answers
/// `queries[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchQuery {
    pub queries: Vec<QueryItem>,
}

impl BatchQuery {
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Vulnerability entry as returned by the database.
///
/// Only `id` is guaranteed. Every other field (summary, details, severity,
/// affected ranges, references, ...) is kept verbatim in `extra` and
/// serialized back at the top level, so the payload passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Vulnerability {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: HashMap::new(),
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.extra.get("summary").and_then(|v| v.as_str())
    }
}

/// An absent or `null` `vulns` means the package has no known vulnerabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResultEntry {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vulns: Vec<Vulnerability>,
}

/// Response body of the batch endpoint.
///
/// `results` is required: a body without it answered none of the queries
/// and must not be read as "no vulnerabilities".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<BatchResultEntry>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Final output unit: one per input package, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityRecord {
    pub package: PackageRef,
    pub vulnerabilities: Vec<Vulnerability>,
    pub scanned_at: DateTime<Utc>,
}

impl VulnerabilityRecord {
    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerabilities.is_empty()
    }
}

/// Aggregate counts over a finished scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_packages: usize,
    pub vulnerable_packages: usize,
    pub total_vulnerabilities: usize,
}

impl ScanSummary {
    pub fn from_records(records: &[VulnerabilityRecord]) -> Self {
        records.iter().fold(Self::default(), |mut acc, record| {
            acc.total_packages += 1;
            if record.is_vulnerable() {
                acc.vulnerable_packages += 1;
            }
            acc.total_vulnerabilities += record.vulnerabilities.len();
            acc
        })
    }
}
