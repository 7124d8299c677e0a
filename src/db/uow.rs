//! Request-scoped unit of work.
//!
//! A `UnitOfWork` owns one pooled connection for its whole lifetime and hands
//! out repositories that borrow it. Dropping it returns the connection to the
//! pool; dropping an uncommitted [`TransactionScope`] rolls the transaction back.

use sqlx::pool::PoolConnection;
use sqlx::{Connection, Sqlite, Transaction};
use tracing::{debug, instrument};

use super::repo::{self, ChangeSet, Repository};
use super::{DbError, Pool};
use crate::model::Coupon;

pub struct UnitOfWork {
    conn: PoolConnection<Sqlite>,
    coupons: ChangeSet<Coupon>,
}

impl UnitOfWork {
    /// Acquire a connection from the pool for this unit of work.
    #[instrument(skip_all)]
    pub async fn begin(pool: &Pool) -> Result<Self, DbError> {
        let conn = pool.acquire().await?;
        Ok(Self {
            conn,
            coupons: ChangeSet::default(),
        })
    }

    pub fn coupons(&mut self) -> Repository<'_, Coupon> {
        Repository::new(&mut *self.conn, &mut self.coupons)
    }

    pub fn has_changes(&self) -> bool {
        self.coupons.has_changes()
    }

    /// Flush every staged change in a single transaction and return the number
    /// of rows affected.
    #[instrument(skip_all)]
    pub async fn complete(&mut self) -> Result<u64, DbError> {
        if !self.has_changes() {
            return Ok(0);
        }
        let mut tx = self.conn.begin().await?;
        let (affected, inserted) = repo::flush(&mut *tx, &self.coupons).await?;
        tx.commit().await?;
        self.coupons.accept(inserted);
        debug!(affected, "unit of work completed");
        Ok(affected)
    }

    /// Open an explicit transaction on this unit of work's connection. The
    /// caller must `commit` it; otherwise it is rolled back when dropped and
    /// the unit of work's change set is left as it was before the scope.
    #[instrument(skip_all)]
    pub async fn transaction(&mut self) -> Result<TransactionScope<'_>, DbError> {
        let tx = self.conn.begin().await?;
        Ok(TransactionScope {
            tx,
            coupons: self.coupons.clone(),
            target: &mut self.coupons,
        })
    }
}

/// Explicit transaction over a unit of work. Repositories obtained here run
/// their statements inside the transaction and stage changes on a working copy
/// of the change set, which replaces the unit of work's only on commit.
pub struct TransactionScope<'c> {
    tx: Transaction<'c, Sqlite>,
    coupons: ChangeSet<Coupon>,
    target: &'c mut ChangeSet<Coupon>,
}

impl<'c> TransactionScope<'c> {
    pub fn coupons(&mut self) -> Repository<'_, Coupon> {
        Repository::new(&mut *self.tx, &mut self.coupons)
    }

    /// Flush staged changes inside the transaction without committing it.
    pub async fn complete(&mut self) -> Result<u64, DbError> {
        let (affected, inserted) = repo::flush(&mut *self.tx, &self.coupons).await?;
        self.coupons.accept(inserted);
        Ok(affected)
    }

    pub async fn commit(self) -> Result<(), DbError> {
        let Self {
            tx,
            coupons,
            target,
        } = self;
        tx.commit().await?;
        *target = coupons;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
