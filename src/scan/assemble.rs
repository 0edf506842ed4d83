use chrono::Utc;

use crate::model::{BatchResultEntry, PackageRef, VulnerabilityRecord};

/// Zips a batch's packages with the positional results of its response.
///
/// A package whose slot is missing (short response) gets an empty
/// vulnerability list. All records share one timestamp.
pub fn assemble_records(
    packages: &[PackageRef],
    results: Vec<BatchResultEntry>,
) -> Vec<VulnerabilityRecord> {
    let scanned_at = Utc::now();
    let mut results = results.into_iter();

    packages
        .iter()
        .map(|pkg| VulnerabilityRecord {
            package: pkg.clone(),
            vulnerabilities: results.next().map(|entry| entry.vulns).unwrap_or_default(),
            scanned_at,
        })
        .collect()
}
