//! Generic repository over one entity type.
//!
//! Two access styles share the same repository:
//! - direct execution (`raw_query`, `raw_execute`, `raw_scalar_query`) takes
//!   effect immediately on the unit of work's connection;
//! - staged mutation (`add`, `remove`, tracked `get` + `tracked_mut`) is held
//!   in the entity's [`ChangeSet`] until the unit of work is completed.

use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, FromRow, Sqlite, SqliteConnection, Type};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::sql::{self, Params, SqlValue};
use super::DbError;

const KEY_PARAM: &str = "__key";

/// A row type persisted in a single table with an integer primary key.
///
/// `TABLE`, `KEY` and the column names returned by [`Entity::columns`] are
/// written into SQL text as-is and must be trusted identifiers.
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Clone + PartialEq + Send + Unpin + 'static {
    const TABLE: &'static str;
    const KEY: &'static str;

    fn key(&self) -> i64;

    /// Persisted columns other than the key, paired with their values.
    fn columns(&self) -> Vec<(&'static str, SqlValue)>;
}

/// Boolean SQL fragment with its own named parameters, used as a predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    clause: String,
    params: Params,
}

impl Filter {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Params::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn by_key<T: Entity>(key: i64) -> Self {
        Filter::new(format!("{} = @{KEY_PARAM}", T::KEY)).bind(KEY_PARAM, key)
    }
}

#[derive(Debug, Clone)]
struct Tracked<T> {
    original: T,
    current: T,
}

impl<T: PartialEq> Tracked<T> {
    fn is_modified(&self) -> bool {
        self.original != self.current
    }
}

/// Pending inserts and deletes plus the identity map of tracked entities.
#[derive(Debug, Clone)]
pub struct ChangeSet<T> {
    added: Vec<T>,
    removed: Vec<i64>,
    tracked: BTreeMap<i64, Tracked<T>>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            tracked: BTreeMap::new(),
        }
    }
}

impl<T: Entity> ChangeSet<T> {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || self.tracked.values().any(Tracked::is_modified)
    }

    /// Start tracking `entity`. An entity already tracked keeps its in-memory
    /// state, which is what the caller gets back.
    fn track(&mut self, entity: T) -> T {
        self.tracked
            .entry(entity.key())
            .or_insert_with(|| Tracked {
                original: entity.clone(),
                current: entity,
            })
            .current
            .clone()
    }

    fn stage_remove(&mut self, entity: &T) {
        if let Some(pos) = self.added.iter().position(|a| a == entity) {
            self.added.remove(pos);
            return;
        }
        let key = entity.key();
        self.tracked.remove(&key);
        if !self.removed.contains(&key) {
            self.removed.push(key);
        }
    }

    /// Mark flushed changes as persisted and start tracking inserted rows.
    pub(crate) fn accept(&mut self, inserted: Vec<T>) {
        self.added.clear();
        self.removed.clear();
        for entry in self.tracked.values_mut() {
            entry.original = entry.current.clone();
        }
        for entity in inserted {
            self.track(entity);
        }
    }
}

/// Repository view over one entity type, borrowing the owning unit of work's
/// connection and change set.
pub struct Repository<'a, T: Entity> {
    conn: &'a mut SqliteConnection,
    changes: &'a mut ChangeSet<T>,
}

impl<'a, T: Entity> Repository<'a, T> {
    pub(crate) fn new(conn: &'a mut SqliteConnection, changes: &'a mut ChangeSet<T>) -> Self {
        Self { conn, changes }
    }

    /// First entity matching `filter`, ordered by key.
    #[instrument(skip_all, fields(table = T::TABLE))]
    pub async fn get(&mut self, filter: Filter, tracked: bool) -> Result<Option<T>, DbError> {
        let sql = format!(
            "SELECT * FROM {} WHERE ({}) ORDER BY {} LIMIT 1",
            T::TABLE,
            filter.clause,
            T::KEY
        );
        let found = sql::query_first::<T>(&mut *self.conn, &sql, &filter.params).await?;
        Ok(found.map(|entity| self.maybe_track(entity, tracked)))
    }

    /// All entities matching `filter`, or every row when `filter` is `None`.
    #[instrument(skip_all, fields(table = T::TABLE))]
    pub async fn get_all(
        &mut self,
        filter: Option<Filter>,
        tracked: bool,
    ) -> Result<Vec<T>, DbError> {
        let (sql, params) = match filter {
            Some(filter) => (
                format!(
                    "SELECT * FROM {} WHERE ({}) ORDER BY {}",
                    T::TABLE,
                    filter.clause,
                    T::KEY
                ),
                filter.params,
            ),
            None => (
                format!("SELECT * FROM {} ORDER BY {}", T::TABLE, T::KEY),
                Params::new(),
            ),
        };
        let rows = sql::query_as::<T>(&mut *self.conn, &sql, &params).await?;
        Ok(self.maybe_track_all(rows, tracked))
    }

    pub fn add(&mut self, entity: T) {
        self.changes.added.push(entity);
    }

    pub fn add_range(&mut self, entities: impl IntoIterator<Item = T>) {
        self.changes.added.extend(entities);
    }

    pub fn remove(&mut self, entity: &T) {
        self.changes.stage_remove(entity);
    }

    pub fn remove_range<'e>(&mut self, entities: impl IntoIterator<Item = &'e T>)
    where
        T: 'e,
    {
        for entity in entities {
            self.changes.stage_remove(entity);
        }
    }

    /// In-place access to a tracked entity; edits are written on completion.
    pub fn tracked_mut(&mut self, key: i64) -> Option<&mut T> {
        self.changes.tracked.get_mut(&key).map(|t| &mut t.current)
    }

    /// Map the rows of a raw statement directly onto `T`.
    pub async fn raw_query(
        &mut self,
        sql: &str,
        params: &Params,
        tracked: bool,
    ) -> Result<Vec<T>, DbError> {
        let rows = sql::query_as::<T>(&mut *self.conn, sql, params).await?;
        Ok(self.maybe_track_all(rows, tracked))
    }

    pub async fn raw_execute(&mut self, sql: &str, params: &Params) -> Result<u64, DbError> {
        sql::execute(&mut *self.conn, sql, params).await
    }

    pub async fn raw_scalar_query<U>(&mut self, sql: &str, params: &Params) -> Result<Vec<U>, DbError>
    where
        U: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
    {
        sql::scalar_query::<U>(&mut *self.conn, sql, params).await
    }

    fn maybe_track(&mut self, entity: T, tracked: bool) -> T {
        if tracked {
            self.changes.track(entity)
        } else {
            entity
        }
    }

    fn maybe_track_all(&mut self, rows: Vec<T>, tracked: bool) -> Vec<T> {
        rows.into_iter()
            .map(|entity| self.maybe_track(entity, tracked))
            .collect()
    }
}

/// Write every staged change of one entity type to `conn`.
///
/// Deletes run first, then updates of modified tracked entities, then inserts.
/// Returns the affected row count and the stored form of every insert; the
/// change set itself is left untouched until the caller accepts it.
#[instrument(skip_all, fields(table = T::TABLE))]
pub(crate) async fn flush<T: Entity>(
    conn: &mut SqliteConnection,
    changes: &ChangeSet<T>,
) -> Result<(u64, Vec<T>), DbError> {
    let mut affected = 0;

    if !changes.removed.is_empty() {
        let delete = format!("DELETE FROM {} WHERE {} = @{KEY_PARAM}", T::TABLE, T::KEY);
        for key in &changes.removed {
            affected += sql::execute(&mut *conn, &delete, &Params::new().bind(KEY_PARAM, *key)).await?;
        }
    }

    for entry in changes.tracked.values().filter(|t| t.is_modified()) {
        let (update, params) = update_statement(&entry.current);
        affected += sql::execute(&mut *conn, &update, &params).await?;
    }

    let mut inserted = Vec::with_capacity(changes.added.len());
    for entity in &changes.added {
        let (insert, params) = insert_statement(entity);
        if let Some(stored) = sql::query_first::<T>(&mut *conn, &insert, &params).await? {
            inserted.push(stored);
        }
    }
    affected += inserted.len() as u64;

    debug!(affected, "flushed change set");
    Ok((affected, inserted))
}

fn insert_statement<T: Entity>(entity: &T) -> (String, Params) {
    let columns = entity.columns();
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<String> = names.iter().map(|name| format!("@{name}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        T::TABLE,
        names.join(", "),
        placeholders.join(", ")
    );
    let mut params = Params::new();
    for (name, value) in columns {
        params.insert(name, value);
    }
    (sql, params)
}

fn update_statement<T: Entity>(entity: &T) -> (String, Params) {
    let columns = entity.columns();
    let assignments: Vec<String> = columns
        .iter()
        .map(|(name, _)| format!("{name} = @{name}"))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = @{KEY_PARAM}",
        T::TABLE,
        assignments.join(", "),
        T::KEY
    );
    let mut params = Params::new().bind(KEY_PARAM, entity.key());
    for (name, value) in columns {
        params.insert(name, value);
    }
    (sql, params)
}
