//! Loader strategies.
//!
//! Every strategy implements the same operation, [`Loader::persist`], and is
//! selected by [`Strategy`]. They are built from the same parts:
//!
//! - [`batch`]: splits the input into commit-sized batches
//! - [`scope`]: wraps a unit of work in a transaction
//! - [`session`]: change tracker and the run's session lifecycle
//! - [`transport`]: columnar buffer for native bulk-copy
//!
//! Row-path strategies (row-at-a-time, periodic commit, range insert) make
//! each flush a durability point: a failure leaves earlier flushes committed.
//! Bulk strategies (native bulk-copy, bulk helper) run in one transaction and
//! commit all rows or none.

pub mod batch;
pub mod scope;
pub mod session;
pub mod transport;

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::mapping::RowMapper;
use crate::core::schema::{Entity, TableSchema};
use crate::error::{LoadError, Result};
use crate::target::{BulkInsertOptions, ConnectionFactory, TargetConnection};

use scope::{with_scope, TransactionScope};
use session::LoadRun;
use transport::{TransportBuffer, DEFAULT_TRANSPORT_CHUNK_SIZE};

/// Default number of records per flush for batched strategies.
pub const DEFAULT_COMMIT_SIZE: usize = 100;

/// How records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Queue every record, flush once at the end.
    RowAtATime,
    /// Queue records one by one, flush every `commit_size` records.
    PeriodicCommit,
    /// Queue whole batches from the Batch Planner, flush once per batch.
    RangeInsert,
    /// Columnar buffer streamed with the destination's bulk-copy protocol.
    NativeBulkCopy,
    /// Full row set handed to the backend's bulk helper.
    BulkHelper,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::RowAtATime,
        Strategy::PeriodicCommit,
        Strategy::RangeInsert,
        Strategy::NativeBulkCopy,
        Strategy::BulkHelper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RowAtATime => "row-at-a-time",
            Strategy::PeriodicCommit => "periodic-commit",
            Strategy::RangeInsert => "range-insert",
            Strategy::NativeBulkCopy => "native-bulk-copy",
            Strategy::BulkHelper => "bulk-helper",
        }
    }

    /// Whether the whole record set commits as one unit.
    pub fn is_bulk(&self) -> bool {
        matches!(self, Strategy::NativeBulkCopy | Strategy::BulkHelper)
    }

    /// Whether the strategy can tear down its session between flushes.
    pub fn supports_session_recreation(&self) -> bool {
        matches!(self, Strategy::PeriodicCommit | Strategy::RangeInsert)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Strategy::ALL.iter().map(Strategy::as_str).collect();
                LoadError::Config(format!(
                    "unknown strategy '{}'. Valid values: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Per-invocation load parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Records per flush for batched strategies (default: 100).
    #[serde(default = "default_commit_size")]
    pub commit_size: usize,

    /// Tear down and reopen the session after every flush.
    #[serde(default)]
    pub recreate_session: bool,

    /// Keep the records' identity values on the row paths. Unset or `false`
    /// lets the destination generate them. Bulk paths always keep identity
    /// and reject `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_identity: Option<bool>,

    /// Wrap a whole row-path run in one transaction.
    #[serde(default)]
    pub use_atomic_transaction: bool,

    /// Rows per wire chunk for native bulk-copy (default: 2500).
    #[serde(default = "default_transport_chunk_size")]
    pub transport_chunk_size: usize,
}

fn default_commit_size() -> usize {
    DEFAULT_COMMIT_SIZE
}

fn default_transport_chunk_size() -> usize {
    DEFAULT_TRANSPORT_CHUNK_SIZE
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            commit_size: DEFAULT_COMMIT_SIZE,
            recreate_session: false,
            preserve_identity: None,
            use_atomic_transaction: false,
            transport_chunk_size: DEFAULT_TRANSPORT_CHUNK_SIZE,
        }
    }
}

impl LoadOptions {
    /// Check the options for `strategy`. Runs before any I/O.
    pub fn validate(&self, strategy: Strategy) -> Result<()> {
        if self.commit_size == 0 {
            return Err(LoadError::Config(
                "commit_size must be greater than 0".into(),
            ));
        }
        if self.transport_chunk_size == 0 {
            return Err(LoadError::Config(
                "transport_chunk_size must be greater than 0".into(),
            ));
        }
        if self.recreate_session && !strategy.supports_session_recreation() {
            return Err(LoadError::Config(format!(
                "recreate_session is not supported by {}",
                strategy
            )));
        }
        if strategy.is_bulk() && self.preserve_identity == Some(false) {
            return Err(LoadError::Config(format!(
                "preserve_identity=false is not supported by {}: bulk strategies always \
                 write the supplied identity values",
                strategy
            )));
        }
        if self.recreate_session && self.use_atomic_transaction {
            return Err(LoadError::Config(
                "use_atomic_transaction cannot be combined with recreate_session: \
                 a transaction cannot span two sessions"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Whether identity values from the records are written as supplied.
    pub fn keep_identity(&self, strategy: Strategy) -> bool {
        strategy.is_bulk() || self.preserve_identity.unwrap_or(false)
    }
}

/// Result of one persist call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub strategy: Strategy,
    pub records_written: u64,
    #[serde(serialize_with = "serialize_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
    pub sessions_opened: usize,
    pub flushes: usize,
}

impl LoadOutcome {
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Persists record sets into one resolved table.
///
/// The schema is resolved once by the caller and reused for every run.
pub struct Loader<'a, F: ConnectionFactory> {
    factory: &'a F,
    schema: &'a TableSchema,
}

impl<'a, F: ConnectionFactory> Loader<'a, F> {
    pub fn new(factory: &'a F, schema: &'a TableSchema) -> Self {
        Self { factory, schema }
    }

    /// Persist `records` with `strategy`.
    ///
    /// Options and the field-to-column mapping are checked before a
    /// connection is opened. Row-path strategies write generated identity
    /// values back into `records`; bulk strategies leave them untouched.
    /// The run's session is released on every exit path.
    pub async fn persist<E: Entity>(
        &self,
        strategy: Strategy,
        records: &mut [E],
        options: &LoadOptions,
    ) -> Result<LoadOutcome> {
        options.validate(strategy)?;
        let mapper = RowMapper::<E>::build(self.schema, options.keep_identity(strategy))?;

        info!(
            "Loading {} {} records into {} with {}",
            records.len(),
            E::entity_name(),
            self.schema.table,
            strategy
        );

        let started = Instant::now();
        let mut run = LoadRun::new(self.factory);
        let outcome = match strategy {
            Strategy::RowAtATime | Strategy::PeriodicCommit | Strategy::RangeInsert => {
                self.row_path(&mut run, strategy, &mapper, records, options)
                    .await
            }
            Strategy::NativeBulkCopy => {
                self.native_bulk_copy(&mut run, &mapper, records, options)
                    .await
            }
            Strategy::BulkHelper => self.bulk_helper(&mut run, &mapper, records).await,
        };
        let outcome = match outcome {
            Ok(written) if mapper.shape().keep_identity => {
                self.reset_identity(&mut run).await.map(|()| written)
            }
            other => other,
        };
        let written = run.finish(outcome).await?;

        let outcome = LoadOutcome {
            strategy,
            records_written: written,
            elapsed: started.elapsed(),
            sessions_opened: run.sessions_opened(),
            flushes: run.flushes(),
        };
        info!(
            "{}: {} rows in {:?} ({} sessions, {} flushes)",
            strategy, outcome.records_written, outcome.elapsed, outcome.sessions_opened, outcome.flushes
        );
        Ok(outcome)
    }

    /// Row paths, optionally inside one ambient transaction.
    ///
    /// Generated identities are written back once their rows are durable:
    /// after every flush for plain runs, after the ambient commit for
    /// atomic ones.
    async fn row_path<E: Entity>(
        &self,
        run: &mut LoadRun<'_, F>,
        strategy: Strategy,
        mapper: &RowMapper<E>,
        records: &mut [E],
        options: &LoadOptions,
    ) -> Result<u64> {
        let ambient = if options.use_atomic_transaction {
            let conn = run.acquire().await?.connection();
            Some(TransactionScope::begin(conn, true).await?)
        } else {
            None
        };

        let mut generated = Vec::new();
        let outcome = match strategy {
            Strategy::RowAtATime => row_at_a_time(run, mapper, records, &mut generated).await,
            Strategy::PeriodicCommit => {
                periodic_commit(run, mapper, records, options, &mut generated).await
            }
            _ => range_insert(run, mapper, records, options, &mut generated).await,
        };

        let outcome = match (ambient, run.session()) {
            (Some(scope), Ok(session)) => scope.finish(session.connection(), outcome).await,
            _ => outcome,
        };

        if outcome.is_err() && options.use_atomic_transaction {
            return outcome;
        }
        let assigned = assign_generated(records, generated);
        outcome.and_then(|written| assigned.map(|()| written))
    }

    async fn native_bulk_copy<E: Entity>(
        &self,
        run: &mut LoadRun<'_, F>,
        mapper: &RowMapper<E>,
        records: &[E],
        options: &LoadOptions,
    ) -> Result<u64> {
        let buffer = TransportBuffer::materialize(mapper, records, options.transport_chunk_size)?;
        debug!(
            "Materialized {} rows x {} columns in {} chunks",
            buffer.rows(),
            buffer.column_count(),
            buffer.chunk_count()
        );

        let conn = run.acquire().await?.connection();
        let job = (mapper.shape(), &buffer);
        let written = with_scope(conn, true, &job, |c, (shape, buffer)| {
            Box::pin(async move {
                let mut written = 0;
                for chunk in buffer.chunks() {
                    written += c.copy_rows(shape, chunk).await?;
                }
                Ok(written)
            })
        })
        .await?;
        run.record_flush();
        Ok(written)
    }

    async fn bulk_helper<E: Entity>(
        &self,
        run: &mut LoadRun<'_, F>,
        mapper: &RowMapper<E>,
        records: &[E],
    ) -> Result<u64> {
        let options = BulkInsertOptions {
            check_constraints: true,
            keep_nulls: true,
            keep_identity: mapper.shape().keep_identity,
        };
        let rows: Vec<_> = records.iter().map(|r| mapper.row(r)).collect();

        let conn = run.acquire().await?.connection();
        let job = (mapper.shape(), rows);
        let written = with_scope(conn, true, &job, |c, (shape, rows)| {
            Box::pin(async move { c.bulk_insert(shape, rows, options).await })
        })
        .await?;
        run.record_flush();
        Ok(written)
    }

    /// Move identity generation past the keys a run wrote explicitly.
    ///
    /// Runs on the session the strategy still holds. Only an empty input
    /// leaves the slot empty, in which case one session is opened here.
    async fn reset_identity(&self, run: &mut LoadRun<'_, F>) -> Result<()> {
        run.acquire()
            .await?
            .connection()
            .reset_identity(self.schema)
            .await
    }
}

/// Write generated identities back into the records they belong to.
fn assign_generated<E: Entity>(records: &mut [E], generated: Vec<(usize, i64)>) -> Result<()> {
    for (index, id) in generated {
        match records.get_mut(index) {
            Some(record) => record.assign_identity(id)?,
            None => warn!("Generated identity {} for unknown record {}", id, index),
        }
    }
    Ok(())
}

async fn row_at_a_time<F: ConnectionFactory, E: Entity>(
    run: &mut LoadRun<'_, F>,
    mapper: &RowMapper<E>,
    records: &[E],
    generated: &mut Vec<(usize, i64)>,
) -> Result<u64> {
    let session = run.acquire().await?;
    for (i, record) in records.iter().enumerate() {
        session.add(i, mapper.owned_row(record));
    }
    generated.extend(run.flush(mapper.shape()).await?);
    Ok(records.len() as u64)
}

/// Queue record by record and flush at every multiple of `commit_size`.
///
/// With session recreation the flushed session is recycled when the next
/// record arrives, so the last session stays held for the run to finish.
async fn periodic_commit<F: ConnectionFactory, E: Entity>(
    run: &mut LoadRun<'_, F>,
    mapper: &RowMapper<E>,
    records: &[E],
    options: &LoadOptions,
    generated: &mut Vec<(usize, i64)>,
) -> Result<u64> {
    let mut written = 0u64;
    let mut recycle = false;
    for (i, record) in records.iter().enumerate() {
        let row = mapper.owned_row(record);
        let session = if recycle {
            recycle = false;
            run.recycle().await?
        } else {
            run.acquire().await?
        };
        session.add(i, row);

        if (i + 1) % options.commit_size == 0 {
            let pending = session.pending() as u64;
            generated.extend(run.flush(mapper.shape()).await?);
            written += pending;
            recycle = options.recreate_session;
        }
    }

    if run.is_active() {
        let pending = run.session()?.pending() as u64;
        generated.extend(run.flush(mapper.shape()).await?);
        written += pending;
    }
    Ok(written)
}

async fn range_insert<F: ConnectionFactory, E: Entity>(
    run: &mut LoadRun<'_, F>,
    mapper: &RowMapper<E>,
    records: &[E],
    options: &LoadOptions,
    generated: &mut Vec<(usize, i64)>,
) -> Result<u64> {
    debug!(
        "Planned {} batches of up to {} records",
        batch::batch_count(records.len(), options.commit_size)?,
        options.commit_size
    );
    let mut written = 0u64;
    let mut offset = 0;
    for (n, batch) in batch::plan(records, options.commit_size)?.enumerate() {
        let session = if n > 0 && options.recreate_session {
            run.recycle().await?
        } else {
            run.acquire().await?
        };
        session.add_range(offset, batch.iter().map(|r| mapper.owned_row(r)));

        generated.extend(run.flush(mapper.shape()).await?);
        written += batch.len() as u64;
        offset += batch.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Example;
    use crate::core::schema::SchemaRegistry;
    use crate::core::value::SqlValue;
    use crate::input;
    use crate::target::MemoryTarget;
    use chrono::NaiveDateTime;

    fn schema() -> TableSchema {
        SchemaRegistry::new()
            .map::<Example>("dbo", "Example")
            .resolve::<Example>()
            .unwrap()
    }

    fn records(n: i32) -> Vec<Example> {
        (1..=n)
            .map(|i| {
                let description = if i % 3 == 0 { None } else { Some(format!("record {}", i)) };
                Example::new(i, description.as_deref(), NaiveDateTime::default())
            })
            .collect()
    }

    /// A record the destination rejects: description over 500 characters.
    fn poison(id: i32) -> Example {
        Example::new(id, Some(&"x".repeat(501)), NaiveDateTime::default())
    }

    /// Stored `(Id, Description, LastModified)` tuples, sorted. The id is
    /// left out unless `with_id` is set.
    fn stored_records(
        target: &MemoryTarget,
        schema: &TableSchema,
        with_id: bool,
    ) -> Vec<(Option<i64>, Option<String>, NaiveDateTime)> {
        let mut stored: Vec<_> = target
            .rows(&schema.table)
            .into_iter()
            .map(|row| {
                let description = match &row["Description"] {
                    SqlValue::Text(s) => Some(s.to_string()),
                    _ => None,
                };
                let last_modified = match &row["LastModified"] {
                    SqlValue::DateTime(stamp) => *stamp,
                    other => panic!("unexpected LastModified {:?}", other),
                };
                let id = row["Id"].as_i64().filter(|_| with_id);
                (id, description, last_modified)
            })
            .collect();
        stored.sort();
        stored
    }

    fn expected_records(
        input: &[Example],
        with_id: bool,
    ) -> Vec<(Option<i64>, Option<String>, NaiveDateTime)> {
        let mut expected: Vec<_> = input
            .iter()
            .map(|e| {
                let id = Some(i64::from(e.id)).filter(|_| with_id);
                (id, e.description.clone(), e.last_modified)
            })
            .collect();
        expected.sort();
        expected
    }

    fn stored_ids(target: &MemoryTarget, schema: &TableSchema) -> Vec<i64> {
        let mut ids: Vec<i64> = target
            .rows(&schema.table)
            .iter()
            .filter_map(|row| row["Id"].as_i64())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn all_variants() -> Vec<(Strategy, LoadOptions)> {
        let mut variants: Vec<(Strategy, LoadOptions)> = Strategy::ALL
            .into_iter()
            .map(|s| (s, LoadOptions::default()))
            .collect();
        for strategy in [Strategy::PeriodicCommit, Strategy::RangeInsert] {
            variants.push((
                strategy,
                LoadOptions {
                    recreate_session: true,
                    ..LoadOptions::default()
                },
            ));
        }
        variants.push((
            Strategy::RowAtATime,
            LoadOptions {
                use_atomic_transaction: true,
                ..LoadOptions::default()
            },
        ));
        variants
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>().unwrap(), strategy);
        }
        assert!("sql-bulk-copy".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let zero_commit = LoadOptions {
            commit_size: 0,
            ..LoadOptions::default()
        };
        assert!(zero_commit.validate(Strategy::RangeInsert).is_err());

        let zero_chunk = LoadOptions {
            transport_chunk_size: 0,
            ..LoadOptions::default()
        };
        assert!(zero_chunk.validate(Strategy::NativeBulkCopy).is_err());

        let recreate = LoadOptions {
            recreate_session: true,
            ..LoadOptions::default()
        };
        assert!(recreate.validate(Strategy::RangeInsert).is_ok());
        assert!(recreate.validate(Strategy::BulkHelper).is_err());

        let both = LoadOptions {
            recreate_session: true,
            use_atomic_transaction: true,
            ..LoadOptions::default()
        };
        assert!(both.validate(Strategy::PeriodicCommit).is_err());
    }

    #[test]
    fn test_identity_defaults_follow_strategy() {
        let options = LoadOptions::default();
        assert!(!options.keep_identity(Strategy::RowAtATime));
        assert!(options.keep_identity(Strategy::NativeBulkCopy));
        let explicit = LoadOptions {
            preserve_identity: Some(true),
            ..LoadOptions::default()
        };
        assert!(explicit.keep_identity(Strategy::RangeInsert));
        let generate = LoadOptions {
            preserve_identity: Some(false),
            ..LoadOptions::default()
        };
        assert!(!generate.keep_identity(Strategy::PeriodicCommit));
        assert!(generate.keep_identity(Strategy::BulkHelper));
        assert!(generate.validate(Strategy::PeriodicCommit).is_ok());
        assert!(matches!(
            generate.validate(Strategy::BulkHelper),
            Err(LoadError::Config(_))
        ));
        assert!(generate.validate(Strategy::NativeBulkCopy).is_err());
    }

    #[tokio::test]
    async fn test_every_strategy_round_trips() {
        let schema = schema();
        let input = input::generate(250).unwrap();
        for (strategy, options) in all_variants() {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut working = input.clone();

            let outcome = loader.persist(strategy, &mut working, &options).await.unwrap();

            assert_eq!(outcome.records_written, 250, "{} {:?}", strategy, options);
            assert_eq!(target.row_count_of(&schema.table), 250);
            let with_id = options.keep_identity(strategy);
            assert_eq!(
                stored_records(&target, &schema, with_id),
                expected_records(&input, with_id),
                "{} {:?}",
                strategy,
                options
            );
            assert_eq!(target.open_sessions(), 0, "{} leaked a session", strategy);
        }
    }

    #[tokio::test]
    async fn test_bulk_strategies_always_keep_supplied_ids() {
        let schema = schema();
        for strategy in [Strategy::NativeBulkCopy, Strategy::BulkHelper] {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut input: Vec<Example> = (101..=103)
                .map(|id| Example::new(id, Some("kept"), NaiveDateTime::default()))
                .collect();

            loader.persist(strategy, &mut input, &LoadOptions::default()).await.unwrap();
            assert_eq!(stored_ids(&target, &schema), vec![101, 102, 103], "{}", strategy);

            let generate = LoadOptions {
                preserve_identity: Some(false),
                ..LoadOptions::default()
            };
            let err = loader.persist(strategy, &mut input, &generate).await.unwrap_err();
            assert!(matches!(err, LoadError::Config(_)), "{}: {}", strategy, err);
            assert_eq!(target.row_count_of(&schema.table), 3);
        }
    }

    #[tokio::test]
    async fn test_fail_fast_before_any_connection() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let options = LoadOptions {
            commit_size: 0,
            ..LoadOptions::default()
        };

        let err = loader
            .persist(Strategy::RangeInsert, &mut records(5), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
        assert_eq!(target.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_bulk_strategies_roll_back_everything() {
        let schema = schema();
        for strategy in [Strategy::NativeBulkCopy, Strategy::BulkHelper] {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut input = records(9);
            input.push(poison(10));

            let err = loader
                .persist(strategy, &mut input, &LoadOptions::default())
                .await
                .unwrap_err();

            assert!(err.is_constraint_violation(), "{}: {}", strategy, err);
            assert_eq!(target.row_count_of(&schema.table), 0, "{}", strategy);
            assert_eq!(target.open_sessions(), 0);
        }
    }

    #[tokio::test]
    async fn test_atomic_row_path_rolls_back_everything() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let mut input = records(9);
        input.push(poison(10));
        let options = LoadOptions {
            commit_size: 3,
            use_atomic_transaction: true,
            ..LoadOptions::default()
        };

        let err = loader
            .persist(Strategy::PeriodicCommit, &mut input, &options)
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(target.row_count_of(&schema.table), 0);
    }

    #[tokio::test]
    async fn test_batched_failure_keeps_earlier_batches() {
        let schema = schema();
        let options = LoadOptions {
            commit_size: 100,
            ..LoadOptions::default()
        };
        for strategy in [Strategy::PeriodicCommit, Strategy::RangeInsert] {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut input = records(250);
            input[149] = poison(150);

            let err = loader.persist(strategy, &mut input, &options).await.unwrap_err();

            assert!(err.is_constraint_violation());
            assert_eq!(target.row_count_of(&schema.table), 100, "{}", strategy);
            assert_eq!(stored_ids(&target, &schema), (1..=100).collect::<Vec<i64>>());
            assert_eq!(target.open_sessions(), 0);
        }
    }

    #[tokio::test]
    async fn test_connectivity_loss_keeps_earlier_batches() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let options = LoadOptions {
            commit_size: 100,
            recreate_session: true,
            ..LoadOptions::default()
        };
        target.fail_after_rows(120);

        let err = loader
            .persist(Strategy::RangeInsert, &mut records(250), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Connectivity { .. }));
        assert_eq!(target.row_count_of(&schema.table), 100);
        assert_eq!(target.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_identity_preserved_when_requested() {
        let schema = schema();
        let options = LoadOptions {
            preserve_identity: Some(true),
            ..LoadOptions::default()
        };
        for strategy in Strategy::ALL {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut input: Vec<Example> = records(50).into_iter().rev().collect();

            loader.persist(strategy, &mut input, &options).await.unwrap();

            assert_eq!(stored_ids(&target, &schema), (1..=50).collect::<Vec<i64>>());
        }
    }

    #[tokio::test]
    async fn test_generated_identity_written_back() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let mut input: Vec<Example> = (0..5)
            .map(|_| Example::new(0, Some("generated"), NaiveDateTime::default()))
            .collect();

        loader
            .persist(Strategy::RangeInsert, &mut input, &LoadOptions { commit_size: 2, ..LoadOptions::default() })
            .await
            .unwrap();

        let ids: Vec<i32> = input.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_bulk_paths_store_null_as_null() {
        let schema = schema();
        for strategy in [Strategy::NativeBulkCopy, Strategy::BulkHelper] {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut input = vec![Example::new(1, None, NaiveDateTime::default())];

            loader.persist(strategy, &mut input, &LoadOptions::default()).await.unwrap();

            let rows = target.rows(&schema.table);
            assert!(rows[0]["Description"].is_null(), "{}", strategy);
        }
    }

    #[tokio::test]
    async fn test_session_recreation_opens_one_session_per_batch() {
        let schema = schema();
        let recreate = LoadOptions {
            commit_size: 100,
            recreate_session: true,
            ..LoadOptions::default()
        };

        for strategy in [Strategy::PeriodicCommit, Strategy::RangeInsert] {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let outcome = loader.persist(strategy, &mut records(250), &recreate).await.unwrap();
            assert_eq!(outcome.sessions_opened, 3, "{}", strategy);
            assert_eq!(outcome.flushes, 3, "{}", strategy);
            assert_eq!(target.sessions_opened(), 3);
            assert_eq!(target.open_sessions(), 0);
        }

        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let outcome = loader
            .persist(Strategy::RangeInsert, &mut records(250), &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.sessions_opened, 1);
        assert_eq!(outcome.flushes, 3);
    }

    #[tokio::test]
    async fn test_identity_reset_reuses_the_last_recreated_session() {
        let schema = schema();
        let options = LoadOptions {
            commit_size: 100,
            recreate_session: true,
            preserve_identity: Some(true),
            ..LoadOptions::default()
        };
        for strategy in [Strategy::PeriodicCommit, Strategy::RangeInsert] {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);

            let outcome = loader.persist(strategy, &mut records(200), &options).await.unwrap();

            assert_eq!(outcome.sessions_opened, 2, "{}", strategy);
            assert_eq!(outcome.flushes, 2, "{}", strategy);
            assert_eq!(target.sessions_opened(), 2, "{}", strategy);
            assert_eq!(target.open_sessions(), 0);

            let mut next = vec![Example::new(0, Some("next"), NaiveDateTime::default())];
            loader
                .persist(Strategy::RowAtATime, &mut next, &LoadOptions::default())
                .await
                .unwrap();
            assert_eq!(next[0].id, 201, "{}", strategy);
        }
    }

    #[tokio::test]
    async fn test_atomic_rollback_leaves_record_ids_untouched() {
        let schema = schema();
        let mut input: Vec<Example> = (0..5)
            .map(|_| Example::new(0, Some("pending"), NaiveDateTime::default()))
            .collect();
        input.push(poison(0));
        let batched = LoadOptions {
            commit_size: 2,
            ..LoadOptions::default()
        };
        let atomic = LoadOptions {
            use_atomic_transaction: true,
            ..batched.clone()
        };

        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let mut working = input.clone();
        let err = loader
            .persist(Strategy::PeriodicCommit, &mut working, &atomic)
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(target.row_count_of(&schema.table), 0);
        assert!(working.iter().all(|e| e.id == 0));

        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let mut working = input.clone();
        loader
            .persist(Strategy::PeriodicCommit, &mut working, &batched)
            .await
            .unwrap_err();
        let ids: Vec<i32> = working.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 0, 0]);
    }

    #[tokio::test]
    async fn test_periodic_commit_flushes_every_multiple() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let options = LoadOptions {
            commit_size: 10,
            ..LoadOptions::default()
        };

        let outcome = loader
            .persist(Strategy::PeriodicCommit, &mut records(35), &options)
            .await
            .unwrap();
        assert_eq!(outcome.flushes, 4);
        assert_eq!(target.commits(), 4);
    }

    #[tokio::test]
    async fn test_row_at_a_time_flushes_once() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let loader = Loader::new(&target, &schema);
        let mut input = records(9);
        input.push(poison(10));

        let err = loader
            .persist(Strategy::RowAtATime, &mut input, &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(target.row_count_of(&schema.table), 0);
    }

    #[tokio::test]
    async fn test_empty_input_writes_nothing() {
        let schema = schema();
        for strategy in Strategy::ALL {
            let target = MemoryTarget::new().with_table(&schema);
            let loader = Loader::new(&target, &schema);
            let mut input: Vec<Example> = Vec::new();
            let outcome = loader
                .persist(strategy, &mut input, &LoadOptions::default())
                .await
                .unwrap();
            assert_eq!(outcome.records_written, 0);
            assert_eq!(target.open_sessions(), 0);
        }
    }
}
