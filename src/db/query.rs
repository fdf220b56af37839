//! Generic result materialization shared by every read accessor.

use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

/// Positional argument bound to a `?` placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqlArg<'a> {
    Int(i64),
    Text(&'a str),
    Bool(bool),
}

impl From<i64> for SqlArg<'_> {
    fn from(v: i64) -> Self {
        SqlArg::Int(v)
    }
}

impl<'a> From<&'a str> for SqlArg<'a> {
    fn from(v: &'a str) -> Self {
        SqlArg::Text(v)
    }
}

impl From<bool> for SqlArg<'_> {
    fn from(v: bool) -> Self {
        SqlArg::Bool(v)
    }
}

/// Run `sql` with `args`, map every row through `map` and append the results
/// to `dest` in cursor order.
///
/// The first mapping or cursor error aborts the call and is returned as is;
/// rows mapped before it stay in `dest`. The row stream, and with it the
/// pooled connection, is dropped on every return path.
pub async fn query_results<'q, T, F>(
    pool: &SqlitePool,
    dest: &mut Vec<T>,
    mut map: F,
    sql: &'q str,
    args: &[SqlArg<'q>],
) -> Result<(), sqlx::Error>
where
    F: FnMut(&SqliteRow) -> Result<T, sqlx::Error>,
{
    let mut query = sqlx::query(sql);
    for arg in args {
        query = match *arg {
            SqlArg::Int(v) => query.bind(v),
            SqlArg::Text(v) => query.bind(v),
            SqlArg::Bool(v) => query.bind(v),
        };
    }

    let mut rows = query.fetch(pool);
    while let Some(row) = rows.try_next().await? {
        dest.push(map(&row)?);
    }
    Ok(())
}
