//! Raw SQL execution with named parameters.
//!
//! sqlx only binds positional placeholders for SQLite (`?` and `?NNN`), so
//! statements written with `@name`, `:name` or `$name` are rewritten to
//! numbered placeholders before binding. Each distinct name gets one number,
//! in order of first appearance, so a name used twice binds one value.
//! Values are always bound, never spliced into the statement text.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Decode, FromRow, Row, Sqlite, SqliteConnection, Type};
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;
use tracing::{debug, instrument};

use super::DbError;

/// A typed value bound to a named placeholder. `Null` is explicit so that
/// filters like `@name IS NULL OR name = @name` receive a real NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v.into())
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Named parameters for one statement. Names may be given with or without
/// their sigil: `"@id"`, `":id"` and `"id"` all address `@id` in the SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, SqlValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<SqlValue>) {
        self.values
            .insert(strip_sigil(name).to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(strip_sigil(name))
    }
}

fn strip_sigil(name: &str) -> &str {
    name.trim_start_matches(['@', ':', '$'])
}

/// Statement rewritten to numbered placeholders, with values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Rewrite named placeholders to `?N` and collect the values to bind.
///
/// Quoted strings, quoted identifiers and comments are copied verbatim.
/// Parameters never referenced by the statement are ignored.
pub fn prepare(sql: &str, params: &Params) -> Result<Prepared, DbError> {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut names: Vec<&str> = Vec::new();
    let mut values = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                copy_quoted(&mut chars, &mut out, c);
            }
            '[' => {
                out.push(c);
                copy_until(&mut chars, &mut out, ']');
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                out.push(c);
                copy_until(&mut chars, &mut out, '\n');
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                out.push(c);
                copy_block_comment(&mut chars, &mut out);
            }
            '@' | ':' | '$' if starts_identifier(chars.peek()) => {
                let start = i + c.len_utf8();
                let mut end = start;
                while let Some(&(j, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        end = j + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &sql[start..end];
                let number = match names.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        let value = params.get(name).cloned().ok_or_else(|| {
                            DbError::MissingParameter {
                                name: name.to_string(),
                            }
                        })?;
                        names.push(name);
                        values.push(value);
                        names.len()
                    }
                };
                out.push('?');
                out.push_str(&number.to_string());
            }
            _ => out.push(c),
        }
    }

    Ok(Prepared { sql: out, values })
}

fn starts_identifier(next: Option<&(usize, char)>) -> bool {
    matches!(next, Some((_, ch)) if ch.is_alphabetic() || *ch == '_')
}

fn copy_quoted(chars: &mut Peekable<CharIndices<'_>>, out: &mut String, quote: char) {
    while let Some((_, ch)) = chars.next() {
        out.push(ch);
        if ch == quote {
            // A doubled quote is an escaped quote, not the end of the literal.
            if matches!(chars.peek(), Some((_, next)) if *next == quote) {
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                }
                continue;
            }
            return;
        }
    }
}

fn copy_until(chars: &mut Peekable<CharIndices<'_>>, out: &mut String, end: char) {
    for (_, ch) in chars.by_ref() {
        out.push(ch);
        if ch == end {
            return;
        }
    }
}

fn copy_block_comment(chars: &mut Peekable<CharIndices<'_>>, out: &mut String) {
    // The opening '*' is consumed here so "/*/" does not close the comment.
    if let Some((_, star)) = chars.next() {
        out.push(star);
    }
    while let Some((_, ch)) = chars.next() {
        out.push(ch);
        if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
            if let Some((_, slash)) = chars.next() {
                out.push(slash);
            }
            return;
        }
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, values: Vec<SqlValue>) -> SqliteQuery<'q> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(v),
            SqlValue::Real(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
        };
    }
    query
}

/// Run a row-returning statement (SELECT, or DML with RETURNING).
#[instrument(skip_all)]
pub async fn query(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &Params,
) -> Result<Vec<SqliteRow>, DbError> {
    let prepared = prepare(sql, params)?;
    debug!(sql = %prepared.sql, bound = prepared.values.len(), "query");
    let rows = bind_all(sqlx::query(&prepared.sql), prepared.values)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Run a row-returning statement and map each row onto `T`.
pub async fn query_as<T>(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &Params,
) -> Result<Vec<T>, DbError>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    let rows = query(conn, sql, params).await?;
    let mapped = rows.iter().map(T::from_row).collect::<Result<Vec<_>, _>>()?;
    Ok(mapped)
}

/// Fetch only the first row mapped onto `T`; remaining rows are not read.
#[instrument(skip_all)]
pub async fn query_first<T>(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &Params,
) -> Result<Option<T>, DbError>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    let prepared = prepare(sql, params)?;
    debug!(sql = %prepared.sql, bound = prepared.values.len(), "query first");
    let mut rows = bind_all(sqlx::query(&prepared.sql), prepared.values).fetch(&mut *conn);
    let first = match rows.try_next().await? {
        Some(row) => Some(T::from_row(&row)?),
        None => None,
    };
    Ok(first)
}

/// Run INSERT / UPDATE / DELETE and return the number of affected rows.
#[instrument(skip_all)]
pub async fn execute(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &Params,
) -> Result<u64, DbError> {
    let prepared = prepare(sql, params)?;
    debug!(sql = %prepared.sql, bound = prepared.values.len(), "execute");
    let result = bind_all(sqlx::query(&prepared.sql), prepared.values)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Run a single-column query and decode the first column of every row as `U`.
pub async fn scalar_query<U>(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &Params,
) -> Result<Vec<U>, DbError>
where
    U: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
{
    let rows = query(conn, sql, params).await?;
    let values = rows
        .iter()
        .map(|row| row.try_get::<U, _>(0))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}
