//! Sessions and the Loader Run that owns them.
//!
//! A [`Session`] is a unit-of-work context: one connection plus a change
//! tracker of queued inserts. [`Session::save_changes`] is the flush. The
//! tracker keeps counting entities across flushes, which is the growth the
//! session-recreating strategies bound.
//!
//! A [`LoadRun`] holds at most one session at a time and moves it through
//! explicit `acquire` / `release` transitions. Recreating a session is
//! [`LoadRun::recycle`]: the held session is closed and a fresh one takes
//! its place.

use tracing::{debug, warn};

use crate::core::mapping::WriteShape;
use crate::core::value::Row;
use crate::error::{LoadError, Result};
use crate::loader::scope::TransactionScope;
use crate::target::{ConnectionFactory, TargetConnection};

/// A queued insert: the record's position in the run input and its row.
#[derive(Debug, Clone)]
struct PendingInsert {
    index: usize,
    row: Row,
}

/// Connection plus change tracker.
pub struct Session<C: TargetConnection> {
    id: usize,
    conn: C,
    pending: Vec<PendingInsert>,
    tracked: usize,
}

impl<C: TargetConnection> Session<C> {
    fn new(id: usize, conn: C) -> Self {
        Self {
            id,
            conn,
            pending: Vec::new(),
            tracked: 0,
        }
    }

    /// Sequence number of this session within its run, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue one insert for the record at `index`.
    pub fn add(&mut self, index: usize, row: Row) {
        self.pending.push(PendingInsert { index, row });
    }

    /// Queue consecutive records starting at `first_index`.
    pub fn add_range(&mut self, first_index: usize, rows: impl IntoIterator<Item = Row>) {
        let rows = rows.into_iter();
        self.pending.reserve(rows.size_hint().0);
        for (offset, row) in rows.enumerate() {
            self.add(first_index + offset, row);
        }
    }

    /// Inserts queued since the last flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Entities tracked by this session across all flushes.
    pub fn tracked(&self) -> usize {
        self.tracked + self.pending.len()
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Flush queued inserts in one atomic scope.
    ///
    /// Joins the connection's ambient transaction when one is open. Returns
    /// `(index, id)` for every identity the destination generated. The queue
    /// is emptied whether or not the flush succeeds.
    pub async fn save_changes(&mut self, shape: &WriteShape) -> Result<Vec<(usize, i64)>> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let scope = TransactionScope::begin(&mut self.conn, true).await?;
        let outcome = Self::write_pending(&mut self.conn, shape, &pending).await;
        let generated = scope.finish(&mut self.conn, outcome).await?;

        self.tracked += pending.len();
        debug!(
            "Session {} flushed {} rows ({} tracked)",
            self.id,
            pending.len(),
            self.tracked
        );
        Ok(generated)
    }

    async fn write_pending(
        conn: &mut C,
        shape: &WriteShape,
        pending: &[PendingInsert],
    ) -> Result<Vec<(usize, i64)>> {
        let mut generated = Vec::new();
        for insert in pending {
            if let Some(id) = conn.insert_row(shape, &insert.row).await? {
                generated.push((insert.index, id));
            }
        }
        Ok(generated)
    }

    async fn close(mut self) -> Result<()> {
        if !self.pending.is_empty() {
            warn!(
                "Session {} released with {} unsaved inserts",
                self.id,
                self.pending.len()
            );
        }
        self.conn.close().await
    }
}

/// One invocation of a strategy: owns the session slot and its accounting.
pub struct LoadRun<'f, F: ConnectionFactory> {
    factory: &'f F,
    slot: Option<Session<F::Connection>>,
    sessions_opened: usize,
    flushes: usize,
}

impl<'f, F: ConnectionFactory> LoadRun<'f, F> {
    pub fn new(factory: &'f F) -> Self {
        Self {
            factory,
            slot: None,
            sessions_opened: 0,
            flushes: 0,
        }
    }

    /// Return the current session, opening one if the slot is empty.
    pub async fn acquire(&mut self) -> Result<&mut Session<F::Connection>> {
        if self.slot.is_none() {
            let conn = self.factory.connect().await?;
            self.sessions_opened += 1;
            debug!("Opened session {}", self.sessions_opened);
            self.slot = Some(Session::new(self.sessions_opened, conn));
        }
        self.session()
    }

    /// The current session, which must have been acquired.
    pub fn session(&mut self) -> Result<&mut Session<F::Connection>> {
        self.slot
            .as_mut()
            .ok_or_else(|| LoadError::Config("no session acquired for this run".into()))
    }

    /// Whether a session is currently held.
    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    /// Flush the current session and count the flush.
    pub async fn flush(&mut self, shape: &WriteShape) -> Result<Vec<(usize, i64)>> {
        let session = self.session()?;
        if session.pending() == 0 {
            return Ok(Vec::new());
        }
        let generated = session.save_changes(shape).await?;
        self.flushes += 1;
        Ok(generated)
    }

    /// Count a flush performed directly on the connection.
    pub fn record_flush(&mut self) {
        self.flushes += 1;
    }

    /// Close the current session, if any.
    pub async fn release(&mut self) -> Result<()> {
        match self.slot.take() {
            Some(session) => {
                let id = session.id();
                session.close().await?;
                debug!("Released session {}", id);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Release and reacquire: the session-recreation transition.
    pub async fn recycle(&mut self) -> Result<&mut Session<F::Connection>> {
        self.release().await?;
        self.acquire().await
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Release the session and return `outcome`, keeping the first error.
    pub async fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        let released = self.release().await;
        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!("Releasing session after error failed: {}", release_err);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::RowMapper;
    use crate::core::record::Example;
    use crate::core::schema::{SchemaRegistry, TableSchema};
    use crate::target::MemoryTarget;
    use chrono::NaiveDateTime;

    fn schema() -> TableSchema {
        SchemaRegistry::new()
            .map::<Example>("dbo", "Example")
            .resolve::<Example>()
            .unwrap()
    }

    fn rows(mapper: &RowMapper<Example>, n: i32) -> Vec<Row> {
        (1..=n)
            .map(|i| mapper.owned_row(&Example::new(i, Some("x"), NaiveDateTime::default())))
            .collect()
    }

    #[tokio::test]
    async fn test_save_changes_returns_generated_identities() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let mapper = RowMapper::<Example>::build(&schema, false).unwrap();

        let mut run = LoadRun::new(&target);
        let session = run.acquire().await.unwrap();
        session.add_range(10, rows(&mapper, 3));
        assert_eq!(session.pending(), 3);

        let generated = run.flush(mapper.shape()).await.unwrap();
        assert_eq!(generated, vec![(10, 1), (11, 2), (12, 3)]);
        assert_eq!(run.flushes(), 1);
        assert_eq!(run.session().unwrap().tracked(), 3);
        assert_eq!(target.row_count_of(&schema.table), 3);

        run.finish(Ok(())).await.unwrap();
        assert_eq!(target.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_tracked_count_grows_across_flushes() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let mapper = RowMapper::<Example>::build(&schema, false).unwrap();

        let mut run = LoadRun::new(&target);
        for _ in 0..3 {
            run.acquire().await.unwrap().add_range(0, rows(&mapper, 2));
            run.flush(mapper.shape()).await.unwrap();
        }
        assert_eq!(run.session().unwrap().tracked(), 6);
        assert_eq!(run.sessions_opened(), 1);

        let fresh = run.recycle().await.unwrap();
        assert_eq!(fresh.tracked(), 0);
        assert_eq!(fresh.id(), 2);
        run.finish(Ok(())).await.unwrap();
        assert_eq!(target.sessions_opened(), 2);
        assert_eq!(target.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_commits_nothing() {
        let schema = schema();
        let target = MemoryTarget::new().with_table(&schema);
        let mapper = RowMapper::<Example>::build(&schema, false).unwrap();

        let mut run = LoadRun::new(&target);
        let session = run.acquire().await.unwrap();
        session.add_range(0, rows(&mapper, 4));
        let too_long = Example::new(5, Some(&"x".repeat(501)), NaiveDateTime::default());
        session.add(4, mapper.owned_row(&too_long));

        let outcome = run.flush(mapper.shape()).await;
        let err = run.finish(outcome).await.unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(target.row_count_of(&schema.table), 0);
        assert_eq!(target.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_before_acquire_is_an_error() {
        let target = MemoryTarget::new();
        let mut run = LoadRun::new(&target);
        assert!(run.session().is_err());
        assert!(!run.is_active());
        run.release().await.unwrap();
    }
}
