use crate::model::{BatchQuery, OsvPackage, PackageRef, QueryItem};

/// One query item per package, same order. Never fails.
pub fn build_batch_query(packages: &[PackageRef]) -> BatchQuery {
    let queries = packages
        .iter()
        .map(|pkg| QueryItem {
            package: OsvPackage {
                name: pkg.name.clone(),
                ecosystem: pkg.ecosystem.clone(),
            },
            version: pkg.version.clone(),
        })
        .collect();

    BatchQuery { queries }
}
