//! Document store
//!
//! Collections of JSON documents keyed by string ids, kept in a single SQLite table. Queries
//! cover the small subset the service needs: equality and inequality filters on top level
//! fields, ordering by a single field and limiting the number of results.
//!
//! Writes are upserts with last-write-wins semantics, there are no cross-document transactions.

use color_eyre::Result;
use color_eyre::eyre::bail;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid field name: {0:?}")]
    InvalidField(String),
    #[error("Field {0} cannot be compared with a composite value")]
    UnsupportedValue(String),
}

/// Single document with its id
#[derive(Debug, Clone, PartialEq)]
pub struct Document<T> {
    /// Document key, unique within the collection
    pub id: String,
    /// Document body
    pub data: T,
}

/// Creates or overwrites a document
pub async fn set<T: Serialize>(
    db: impl sqlx::Executor<'_, Database = Sqlite>,
    collection: &str,
    id: &str,
    data: &T,
) -> Result<()> {
    let data = serde_json::to_string(data)?;

    sqlx::query(
        "insert into documents (collection, id, data) values (?, ?, ?) \
         on conflict(collection, id) do update set data = excluded.data",
    )
    .bind(collection)
    .bind(id)
    .bind(data)
    .execute(db)
    .await?;

    Ok(())
}

/// Reads a single document
pub async fn get<T: DeserializeOwned>(
    db: impl sqlx::Executor<'_, Database = Sqlite>,
    collection: &str,
    id: &str,
) -> Result<Option<Document<T>>> {
    let row: Option<(String,)> =
        sqlx::query_as("select data from documents where collection = ? and id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(db)
            .await?;

    row.map(|(data,)| -> Result<Document<T>> {
        Ok(Document {
            id: id.to_owned(),
            data: serde_json::from_str(&data)?,
        })
    })
    .transpose()
}

/// Removes a document, missing documents are ignored
#[cfg(test)]
pub async fn delete(
    db: impl sqlx::Executor<'_, Database = Sqlite>,
    collection: &str,
    id: &str,
) -> Result<()> {
    sqlx::query("delete from documents where collection = ? and id = ?")
        .bind(collection)
        .bind(id)
        .execute(db)
        .await?;

    Ok(())
}

/// Filter comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Field is present and equal to the value
    Eq,
    /// Field is present and differs from the value
    Ne,
}

/// Ordering direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// How the ordering field values are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderKey {
    /// JSON values as stored
    Value,
    /// ISO-8601 timestamps, compared as points in time
    Time,
}

#[derive(Debug, Clone)]
struct Order {
    field: String,
    direction: Direction,
    key: OrderKey,
}

#[derive(Debug, Clone)]
struct Filter {
    field: String,
    op: Op,
    value: Value,
}

/// Collection query
#[derive(Debug, Clone)]
pub struct Query {
    collection: String,
    filters: Vec<Filter>,
    order_by: Option<Order>,
    limit: Option<u32>,
}

impl Query {
    /// Starts a query over the whole collection
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: vec![],
            order_by: None,
            limit: None,
        }
    }

    /// Narrows the query with a field filter
    pub fn filter(mut self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Orders results by a field. Documents with equal values are ordered by their ids.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(Order {
            field: field.into(),
            direction,
            key: OrderKey::Value,
        });
        self
    }

    /// Orders results by a timestamp field
    ///
    /// Timestamps with different precision or offsets are compared by the time they represent.
    /// Values which are not valid timestamps come last in descending order and first in
    /// ascending order.
    pub fn order_by_time(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(Order {
            field: field.into(),
            direction,
            key: OrderKey::Time,
        });
        self
    }

    /// Limits the number of returned documents
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Executes the query
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        db: impl sqlx::Executor<'_, Database = Sqlite>,
    ) -> Result<Vec<Document<T>>> {
        let mut query = self.build()?;
        let rows: Vec<(String, String)> = query.build_query_as().fetch_all(db).await?;

        rows.into_iter()
            .map(|(id, data)| -> Result<Document<T>> {
                Ok(Document {
                    id,
                    data: serde_json::from_str(&data)?,
                })
            })
            .collect()
    }

    fn build(&self) -> Result<QueryBuilder<'static, Sqlite>> {
        let mut query = QueryBuilder::new("select id, data from documents where collection = ");
        query.push_bind(self.collection.clone());

        for filter in &self.filters {
            let path = json_path(&filter.field)?;
            query.push(" and ");

            match filter.op {
                Op::Eq => push_matches(&mut query, &filter.field, &path, &filter.value)?,
                Op::Ne => {
                    query.push("(json_type(data, ");
                    query.push_bind(path.clone());
                    query.push(") is not null and not ");
                    push_matches(&mut query, &filter.field, &path, &filter.value)?;
                    query.push(")");
                }
            }
        }

        query.push(" order by ");
        if let Some(Order {
            field,
            direction,
            key,
        }) = &self.order_by
        {
            let path = json_path(field)?;
            let direction = match direction {
                Direction::Ascending => " asc, ",
                Direction::Descending => " desc, ",
            };

            if *key == OrderKey::Time {
                query.push("julianday(json_extract(data, ");
                query.push_bind(path.clone());
                query.push("))");
                query.push(direction);
            }

            query.push("json_extract(data, ");
            query.push_bind(path);
            query.push(")");
            query.push(direction);
        }
        query.push("id asc");

        if let Some(limit) = self.limit {
            query.push(" limit ");
            query.push_bind(i64::from(limit));
        }

        Ok(query)
    }
}

/// Builds JSON path of a top level field
fn json_path(field: &str) -> Result<String, Error> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(Error::InvalidField(field.to_owned()));
    }

    Ok(format!("$.{field}"))
}

/// Pushes a condition true when the field at `path` holds `value`
///
/// JSON types are compared as well, so `true` never matches `1` and `"1"` never matches `1`.
fn push_matches(
    query: &mut QueryBuilder<'static, Sqlite>,
    field: &str,
    path: &str,
    value: &Value,
) -> Result<()> {
    query.push("(json_type(data, ");
    query.push_bind(path.to_owned());

    match value {
        Value::Null => {
            query.push(") = 'null')");
        }
        Value::Bool(true) => {
            query.push(") = 'true')");
        }
        Value::Bool(false) => {
            query.push(") = 'false')");
        }
        Value::Number(number) => {
            query.push(") in ('integer', 'real') and json_extract(data, ");
            query.push_bind(path.to_owned());
            query.push(") = ");
            match (number.as_i64(), number.as_f64()) {
                (Some(number), _) => query.push_bind(number),
                (None, Some(number)) => query.push_bind(number),
                (None, None) => bail!(Error::UnsupportedValue(field.to_owned())),
            };
            query.push(")");
        }
        Value::String(string) => {
            query.push(") = 'text' and json_extract(data, ");
            query.push_bind(path.to_owned());
            query.push(") = ");
            query.push_bind(string.clone());
            query.push(")");
        }
        Value::Array(_) | Value::Object(_) => bail!(Error::UnsupportedValue(field.to_owned())),
    }

    Ok(())
}
