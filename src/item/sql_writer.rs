//! # PostgreSQL Batch Writer
//!
//! [`ItemWriter`] that executes one parameterized statement per item, all
//! items of a write call inside a single transaction.
//!
//! When the chunk transaction carries a database transaction (the repository is
//! PostgreSQL on the same pool) every write call runs in a savepoint of it, so
//! a rejected call is undone on its own and the chunk's rows commit only with
//! the step checkpoint. Without one the writer opens and commits its own
//! transaction per call.
//!
//! Statements use named `:name` placeholders that are rewritten to positional
//! `$n` parameters once at construction; `::type` casts and quoted literals are
//! left alone. Values come from the item's [`SqlParameterSource`].

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Acquire, PgConnection, PgPool, Postgres};
use tracing::debug;

use super::{FieldType, FieldValue, ItemError, ItemResult, ItemWriter, SqlParameterSource};
use crate::repository::ChunkTransaction;

#[derive(Debug, Clone)]
pub struct PgBatchItemWriter {
    pool: PgPool,
    sql: String,
    parameter_names: Vec<String>,
    assert_updates: bool,
}

impl PgBatchItemWriter {
    pub fn new(pool: PgPool, named_sql: &str) -> ItemResult<Self> {
        let (sql, parameter_names) = parse_named_parameters(named_sql)?;
        Ok(Self {
            pool,
            sql,
            parameter_names,
            assert_updates: true,
        })
    }

    /// Treat a statement that affected no rows as an invalid item (default true)
    pub fn assert_updates(mut self, assert_updates: bool) -> Self {
        self.assert_updates = assert_updates;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    fn bind_item<'q, T: SqlParameterSource>(
        &'q self,
        item: &T,
    ) -> ItemResult<Query<'q, Postgres, PgArguments>> {
        let mut query = sqlx::query(&self.sql);
        for name in &self.parameter_names {
            let value = item
                .sql_parameter(name)
                .ok_or_else(|| ItemError::invalid(format!("no value for parameter ':{name}'")))?;
            query = bind_value(query, value);
        }
        Ok(query)
    }
}

fn bind_value(
    query: Query<'_, Postgres, PgArguments>,
    value: FieldValue,
) -> Query<'_, Postgres, PgArguments> {
    match value {
        FieldValue::Text(v) => query.bind(v),
        FieldValue::Long(v) => query.bind(v),
        FieldValue::Double(v) => query.bind(v),
        FieldValue::Char(v) => query.bind(v.to_string()),
        FieldValue::Date(v) => query.bind(v),
        FieldValue::Null(FieldType::Long) => query.bind(Option::<i64>::None),
        FieldValue::Null(FieldType::Double) => query.bind(Option::<f64>::None),
        FieldValue::Null(FieldType::Date) => query.bind(Option::<NaiveDate>::None),
        FieldValue::Null(FieldType::String | FieldType::Char) => {
            query.bind(Option::<String>::None)
        }
    }
}

impl PgBatchItemWriter {
    async fn execute_items<T: SqlParameterSource>(
        &self,
        conn: &mut PgConnection,
        items: &[T],
    ) -> ItemResult<()> {
        for (index, item) in items.iter().enumerate() {
            let result = self.bind_item(item)?.execute(&mut *conn).await?;
            if self.assert_updates && result.rows_affected() == 0 {
                return Err(ItemError::invalid(format!(
                    "item {index} of chunk updated no rows"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T> ItemWriter<T> for PgBatchItemWriter
where
    T: SqlParameterSource + Send + Sync,
{
    async fn write(&self, items: &[T], transaction: &mut ChunkTransaction) -> ItemResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        match transaction.database() {
            Some(chunk_tx) => {
                let mut savepoint = Acquire::begin(&mut *chunk_tx).await?;
                if let Err(e) = self.execute_items(&mut savepoint, items).await {
                    savepoint.rollback().await?;
                    return Err(e);
                }
                savepoint.commit().await?;
            }
            None => {
                let mut tx = self.pool.begin().await?;
                self.execute_items(&mut tx, items).await?;
                tx.commit().await?;
            }
        }

        debug!(items = items.len(), "Chunk written");
        Ok(())
    }
}

/// Rewrite `:name` placeholders to `$n`, returning the SQL and the parameter
/// names in positional order
pub fn parse_named_parameters(named_sql: &str) -> ItemResult<(String, Vec<String>)> {
    let mut sql = String::with_capacity(named_sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut chars = named_sql.chars().peekable();
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            sql.push(c);
            continue;
        }
        if in_literal || c != ':' {
            sql.push(c);
            continue;
        }

        match chars.peek() {
            Some(':') => {
                sql.push_str("::");
                chars.next();
            }
            Some(next) if next.is_ascii_alphabetic() || *next == '_' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' || n == '.' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let position = match names.iter().position(|existing| *existing == name) {
                    Some(existing) => existing + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                sql.push('$');
                sql.push_str(&position.to_string());
            }
            _ => sql.push(c),
        }
    }

    if in_literal {
        return Err(ItemError::fatal("unterminated string literal in statement"));
    }
    Ok((sql.trim().to_string(), names))
}
