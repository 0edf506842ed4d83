//! Scan orchestration across batches.
//!
//! This module provides the [`ScanPipeline`] coordinator that runs
//! Partition → (Query → Execute → Assemble per batch) with:
//! - Sequential batch execution by default, bounded concurrency on request
//! - Fail-whole semantics: one failed batch fails the scan
//! - Cooperative cancellation via `tokio_util`'s `CancellationToken`
//! - Structured logging via `tracing`

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::{OsvConfig, DEFAULT_MAX_BATCH_SIZE};
use crate::model::{PackageRef, ScanSummary, VulnerabilityRecord};
use crate::scan::{assemble_records, build_batch_query, split_into_batches};
use crate::traits::{ScanError, VulnerabilityDatabase};

/// Batched vulnerability scan over a [`VulnerabilityDatabase`].
///
/// The pipeline holds no per-scan state, so one instance can serve any
/// number of concurrent `scan` calls.
///
/// # Example
///
/// ```ignore
/// use osv_batch_scanner::{OsvBatchExecutor, OsvConfig, PackageRef, ScanPipeline};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = OsvConfig::from_env()?;
///     let pipeline = ScanPipeline::from_config(OsvBatchExecutor::new(&config)?, &config);
///
///     let records = pipeline
///         .scan(&[PackageRef::new("lodash", "4.17.20", "npm")])
///         .await?;
///     println!("{} vulnerabilities", records[0].vulnerabilities.len());
///     Ok(())
/// }
/// ```
pub struct ScanPipeline<D>
where
    D: VulnerabilityDatabase + 'static,
{
    database: Arc<D>,

    /// Packages per batch (default: 1000)
    batch_size: usize,

    /// Batches in flight at once; 1 means strictly sequential
    concurrency: usize,

    cancel: CancellationToken,
}

impl<D> ScanPipeline<D>
where
    D: VulnerabilityDatabase + 'static,
{
    /// Creates a pipeline that owns `database`.
    ///
    /// Default configuration:
    /// - Batch size: 1000 packages
    /// - Concurrency: 1 (batches run one after another)
    /// - Cancellation: a token nobody else holds, so never cancelled
    pub fn new(database: D) -> Self {
        Self::from_shared(Arc::new(database))
    }

    /// Creates a pipeline over a database shared with other pipelines, so
    /// they all reuse one connection pool.
    ///
    /// Same defaults as [`ScanPipeline::new`].
    pub fn from_shared(database: Arc<D>) -> Self {
        Self {
            database,
            batch_size: DEFAULT_MAX_BATCH_SIZE,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `config.max_batch_size` as the batch size.
    pub fn from_config(database: D, config: &OsvConfig) -> Self {
        Self::new(database).with_batch_size(config.max_batch_size)
    }

    /// Sets the number of packages sent per request.
    ///
    /// # Arguments
    ///
    /// * `batch_size` - Packages per batch. Zero is accepted here and
    ///   rejected by `scan` before any network call
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets how many batches may be in flight at once.
    ///
    /// Output order and fail-fast behaviour do not depend on this value.
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Maximum concurrent batch requests; values below 1
    ///   are raised to 1 (strictly sequential)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Attaches a cancellation token.
    ///
    /// Once `token` fires, scans stop at the next batch boundary and fail
    /// with [`ScanError::Cancelled`].
    ///
    /// # Arguments
    ///
    /// * `token` - Token shared with whoever may cancel the scan
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the database this pipeline queries.
    pub fn database(&self) -> &D {
        &self.database
    }

    /// Returns the batch size `scan` uses.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Scans with the configured batch size.
    pub async fn scan(
        &self,
        packages: &[PackageRef],
    ) -> Result<Vec<VulnerabilityRecord>, ScanError> {
        self.scan_with_batch_size(packages, self.batch_size).await
    }

    /// Returns one record per package, in input order, or the first error.
    ///
    /// # Errors
    ///
    /// - [`ScanError::InvalidArgument`] for a zero batch size or a package
    ///   with an empty field; nothing is sent in that case
    /// - [`ScanError::BatchFailed`] wrapping the executor error of the
    ///   first batch that failed
    /// - [`ScanError::Cancelled`] if the cancellation token fired
    ///
    /// Records from batches that already succeeded are discarded on error.
    #[instrument(skip(self, packages), fields(database = %self.database.name(), package_count = packages.len()))]
    pub async fn scan_with_batch_size(
        &self,
        packages: &[PackageRef],
        batch_size: usize,
    ) -> Result<Vec<VulnerabilityRecord>, ScanError> {
        let start = Instant::now();
        info!(package_count = packages.len(), "Starting vulnerability scan");

        for pkg in packages {
            pkg.validate()?;
        }
        let batches = split_into_batches(packages, batch_size)?;
        info!(batch_count = batches.len(), batch_size, "Split into batches");

        let records = if self.concurrency > 1 && batches.len() > 1 {
            self.run_concurrent(batches).await?
        } else {
            self.run_sequential(batches).await?
        };

        let summary = ScanSummary::from_records(&records);
        info!(
            vulnerable = summary.vulnerable_packages,
            total = summary.total_packages,
            vulnerabilities = summary.total_vulnerabilities,
            duration_ms = start.elapsed().as_millis() as u64,
            "Vulnerability scan completed: found vulnerabilities in {}/{} packages",
            summary.vulnerable_packages,
            summary.total_packages
        );

        Ok(records)
    }

    fn ensure_not_cancelled(&self) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            info!("Scan cancelled; abandoning remaining batches");
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }

    async fn run_sequential(
        &self,
        batches: Vec<Vec<PackageRef>>,
    ) -> Result<Vec<VulnerabilityRecord>, ScanError> {
        let total = batches.len();
        let mut records = Vec::with_capacity(batches.iter().map(Vec::len).sum());

        for (i, batch) in batches.iter().enumerate() {
            self.ensure_not_cancelled()?;
            let parsed = run_batch(self.database.as_ref(), i + 1, total, batch).await?;
            records.extend(parsed);
        }
        self.ensure_not_cancelled()?;

        Ok(records)
    }

    async fn run_concurrent(
        &self,
        batches: Vec<Vec<PackageRef>>,
    ) -> Result<Vec<VulnerabilityRecord>, ScanError> {
        let total = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (i, batch) in batches.into_iter().enumerate() {
            let database = Arc::clone(&self.database);
            let permits = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();

            join_set.spawn(async move {
                let _permit = permits
                    .acquire()
                    .await
                    .map_err(|e| ScanError::Internal(format!("Semaphore error: {}", e)))?;
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                let parsed = run_batch(database.as_ref(), i + 1, total, &batch).await?;
                Ok::<_, ScanError>((i, parsed))
            });
        }

        let mut slots: Vec<Option<Vec<VulnerabilityRecord>>> = vec![None; total];

        loop {
            let joined = tokio::select! {
                _ = self.cancel.cancelled() => {
                    join_set.abort_all();
                    info!("Scan cancelled; aborting outstanding batches");
                    return Err(ScanError::Cancelled);
                }
                joined = join_set.join_next() => joined,
            };

            let Some(joined) = joined else { break };
            let outcome = joined
                .map_err(|e| ScanError::Internal(format!("Batch task failed: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok((i, parsed)) => slots[i] = Some(parsed),
                Err(e) => {
                    join_set.abort_all();
                    return Err(e);
                }
            }
        }
        self.ensure_not_cancelled()?;

        Ok(slots.into_iter().flatten().flatten().collect())
    }
}

/// Query → Execute → Assemble for one batch. `index` is 1-based.
async fn run_batch<D>(
    database: &D,
    index: usize,
    total: usize,
    batch: &[PackageRef],
) -> Result<Vec<VulnerabilityRecord>, ScanError>
where
    D: VulnerabilityDatabase + ?Sized,
{
    info!(
        batch = index,
        total,
        size = batch.len(),
        "Processing batch {}/{} ({} packages)",
        index,
        total,
        batch.len()
    );

    let query = build_batch_query(batch);
    let response = database.query_batch(&query).await.map_err(|e| {
        error!(
            batch = index,
            total,
            size = batch.len(),
            error = %e,
            "Batch query failed"
        );
        ScanError::BatchFailed {
            index,
            total,
            size: batch.len(),
            source: Box::new(e),
        }
    })?;

    let parsed = assemble_records(batch, response.results);
    info!(
        batch = index,
        total,
        vulnerable = parsed.iter().filter(|r| r.is_vulnerable()).count(),
        "Batch completed"
    );

    Ok(parsed)
}
