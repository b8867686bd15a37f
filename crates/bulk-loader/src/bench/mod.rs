//! Benchmark harness.
//!
//! Runs a suite of strategy cases against the same input. Before each case
//! the destination table is truncated through a fresh connection and the
//! input is cloned, so every case starts from an empty table and untouched
//! records. A failing case is recorded and the suite moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::core::schema::{Entity, TableSchema};
use crate::error::{LoadError, Result};
use crate::loader::{LoadOptions, Loader, Strategy};
use crate::target::{ConnectionFactory, TargetConnection};

/// How a case sizes its batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batching {
    /// Use the configured `commit_size`.
    Configured,
    /// One batch holding the whole input.
    Whole,
}

/// One entry of the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchCase {
    pub label: &'static str,
    pub strategy: Strategy,
    pub recreate_session: bool,
    pub batching: Batching,
}

impl BenchCase {
    const fn new(label: &'static str, strategy: Strategy) -> Self {
        Self {
            label,
            strategy,
            recreate_session: false,
            batching: Batching::Configured,
        }
    }

    const fn recreating(mut self) -> Self {
        self.recreate_session = true;
        self
    }

    const fn whole(mut self) -> Self {
        self.batching = Batching::Whole;
        self
    }

    /// The default suite, in run order.
    pub const SUITE: [BenchCase; 8] = [
        BenchCase::new("row-at-a-time", Strategy::RowAtATime),
        BenchCase::new("periodic-commit", Strategy::PeriodicCommit),
        BenchCase::new("periodic-commit-recreate", Strategy::PeriodicCommit).recreating(),
        BenchCase::new("range-insert", Strategy::RangeInsert).whole(),
        BenchCase::new("range-insert-batched", Strategy::RangeInsert),
        BenchCase::new("range-insert-recreate", Strategy::RangeInsert).recreating(),
        BenchCase::new("bulk-helper", Strategy::BulkHelper),
        BenchCase::new("native-bulk-copy", Strategy::NativeBulkCopy),
    ];

    /// Look up a suite case by label.
    pub fn find(label: &str) -> Result<&'static BenchCase> {
        Self::SUITE.iter().find(|c| c.label == label).ok_or_else(|| {
            let labels: Vec<&str> = Self::SUITE.iter().map(|c| c.label).collect();
            LoadError::Config(format!(
                "unknown bench case '{}'. Valid values: {}",
                label,
                labels.join(", ")
            ))
        })
    }

    /// Select cases by label; an empty selection is the full suite.
    pub fn select(labels: &[String]) -> Result<Vec<&'static BenchCase>> {
        if labels.is_empty() {
            return Ok(Self::SUITE.iter().collect());
        }
        labels.iter().map(|l| Self::find(l)).collect()
    }

    /// Options for this case, derived from the configured ones.
    pub fn options(&self, base: &LoadOptions, record_count: usize) -> LoadOptions {
        let commit_size = match self.batching {
            Batching::Configured => base.commit_size,
            Batching::Whole => record_count.max(1),
        };
        LoadOptions {
            commit_size,
            recreate_session: self.recreate_session,
            use_atomic_transaction: base.use_atomic_transaction
                && !self.recreate_session
                && !self.strategy.is_bulk(),
            preserve_identity: if self.strategy.is_bulk() {
                None
            } else {
                base.preserve_identity
            },
            ..base.clone()
        }
    }
}

/// Outcome of one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub label: String,
    pub strategy: Strategy,
    pub records_written: u64,
    pub elapsed_ms: u64,
    pub sessions: usize,
    pub flushes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CaseResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a suite run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// Destination description, without credentials.
    pub target: String,
    pub table: String,
    pub record_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub cases: Vec<CaseResult>,
}

impl BenchReport {
    /// Convert the report to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of cases that failed.
    pub fn failed(&self) -> usize {
        self.cases.iter().filter(|c| !c.succeeded()).count()
    }

    /// One line per case: label padded to 60 columns, then milliseconds.
    pub fn render_text(&self) -> String {
        let mut out = format!("Read {} records\n", self.record_count);
        for case in &self.cases {
            let name = format!("{}:", case.label);
            let line = match &case.error {
                None => format!("{:<60}{}\n", name, case.elapsed_ms),
                Some(e) => format!("{:<60}FAILED ({})\n", name, e),
            };
            out.push_str(&line);
        }
        out
    }
}

/// Runs suite cases against one destination table.
pub struct BenchRunner<'a, F: ConnectionFactory> {
    factory: &'a F,
    schema: &'a TableSchema,
    options: LoadOptions,
    create_table: bool,
}

impl<'a, F: ConnectionFactory> BenchRunner<'a, F> {
    pub fn new(factory: &'a F, schema: &'a TableSchema, options: LoadOptions) -> Self {
        Self {
            factory,
            schema,
            options,
            create_table: false,
        }
    }

    /// Create the table before the first case if it does not exist.
    pub fn create_table(mut self, create: bool) -> Self {
        self.create_table = create;
        self
    }

    /// Run `cases` in order over clones of `records`.
    ///
    /// Returns an error only when the table cannot be prepared or reset;
    /// strategy failures are recorded in the report.
    pub async fn run<E: Entity>(
        &self,
        cases: &[&BenchCase],
        records: &[E],
    ) -> Result<BenchReport> {
        let started_at = Utc::now();
        info!(
            "Running {} bench cases over {} records against {}",
            cases.len(),
            records.len(),
            self.factory.describe()
        );

        if self.create_table {
            let mut conn = self.factory.connect().await?;
            conn.ensure_table(self.schema).await?;
            conn.close().await?;
        }

        let loader = Loader::new(self.factory, self.schema);
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            self.reset_table().await?;

            let mut working = records.to_vec();
            let options = case.options(&self.options, records.len());
            let result = match loader.persist(case.strategy, &mut working, &options).await {
                Ok(outcome) => CaseResult {
                    label: case.label.to_string(),
                    strategy: case.strategy,
                    records_written: outcome.records_written,
                    elapsed_ms: outcome.elapsed.as_millis() as u64,
                    sessions: outcome.sessions_opened,
                    flushes: outcome.flushes,
                    error: None,
                },
                Err(e) => {
                    error!("{} failed: {}", case.label, e);
                    CaseResult {
                        label: case.label.to_string(),
                        strategy: case.strategy,
                        records_written: self.committed_rows().await,
                        elapsed_ms: 0,
                        sessions: 0,
                        flushes: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            info!("{:<60}{}", format!("{}:", result.label), result.elapsed_ms);
            results.push(result);
        }

        Ok(BenchReport {
            target: self.factory.describe(),
            table: self.schema.full_name(),
            record_count: records.len(),
            started_at,
            completed_at: Utc::now(),
            cases: results,
        })
    }

    /// Rows a failed case left committed. Counting failures are logged and
    /// reported as zero.
    async fn committed_rows(&self) -> u64 {
        match self.count_rows().await {
            Ok(rows) => u64::try_from(rows).unwrap_or_default(),
            Err(e) => {
                warn!("Could not count rows left by failed case: {}", e);
                0
            }
        }
    }

    async fn count_rows(&self) -> Result<i64> {
        let mut conn = self.factory.connect().await?;
        let rows = conn.row_count(&self.schema.table).await;
        conn.close().await?;
        rows
    }

    async fn reset_table(&self) -> Result<()> {
        let mut conn = self.factory.connect().await?;
        conn.truncate(&self.schema.table).await?;
        conn.close().await
    }
}
