//! Transaction Scope Manager.
//!
//! A [`TransactionScope`] is opened against a connection and closed with an
//! explicit outcome. It does not hold the connection, so the body it guards
//! can keep using the same connection in between.
//!
//! - A non-atomic scope is a passthrough: the body manages its own flushes.
//! - An atomic scope begins a transaction, or joins the one already open on
//!   the connection. Only the scope that began the transaction commits or
//!   rolls it back; a joined scope leaves the decision to its owner.

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::Result;
use crate::target::TargetConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Passthrough,
    Owned,
    Joined,
}

/// Guard for one unit of work on a connection.
#[derive(Debug)]
pub struct TransactionScope {
    mode: Mode,
    open: bool,
}

impl TransactionScope {
    /// Open a scope. When `atomic`, begins a transaction unless one is already
    /// open on `conn`, in which case the scope joins it.
    pub async fn begin<C>(conn: &mut C, atomic: bool) -> Result<Self>
    where
        C: TargetConnection + ?Sized,
    {
        let mode = if !atomic {
            Mode::Passthrough
        } else if conn.in_transaction() {
            debug!("Joining ambient transaction");
            Mode::Joined
        } else {
            conn.begin().await?;
            Mode::Owned
        };
        Ok(Self { mode, open: true })
    }

    /// Whether this scope began the transaction it guards.
    pub fn owns_transaction(&self) -> bool {
        self.mode == Mode::Owned
    }

    /// Commit an owned transaction.
    pub async fn complete<C>(mut self, conn: &mut C) -> Result<()>
    where
        C: TargetConnection + ?Sized,
    {
        self.open = false;
        if self.mode == Mode::Owned {
            conn.commit().await?;
        }
        Ok(())
    }

    /// Roll back an owned transaction.
    pub async fn abort<C>(mut self, conn: &mut C) -> Result<()>
    where
        C: TargetConnection + ?Sized,
    {
        self.open = false;
        if self.mode == Mode::Owned {
            warn!("Rolling back transaction");
            conn.rollback().await?;
        }
        Ok(())
    }

    /// Close the scope according to the body's outcome.
    ///
    /// Commits on `Ok`, rolls back on `Err`. A rollback failure is logged and
    /// the body's error is returned.
    pub async fn finish<C, T>(self, conn: &mut C, outcome: Result<T>) -> Result<T>
    where
        C: TargetConnection + ?Sized,
    {
        match outcome {
            Ok(value) => {
                self.complete(conn).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.abort(conn).await {
                    warn!("Rollback failed after error: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.open && self.mode == Mode::Owned {
            warn!("Transaction scope dropped while open; the connection discards the transaction");
        }
    }
}

/// Run `body` inside a scope on `conn`.
///
/// `ctx` is handed to the body alongside the connection so the body can
/// borrow caller data without capturing it.
pub async fn with_scope<C, X, T, F>(conn: &mut C, atomic: bool, ctx: &X, body: F) -> Result<T>
where
    C: TargetConnection + ?Sized,
    X: ?Sized + Sync,
    F: for<'b> FnOnce(&'b mut C, &'b X) -> BoxFuture<'b, Result<T>>,
{
    let scope = TransactionScope::begin(conn, atomic).await?;
    let outcome = body(conn, ctx).await;
    scope.finish(conn, outcome).await
}
