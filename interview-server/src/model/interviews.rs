//! Interview records
//!
//! Interviews are documents in the `interviews` collection, written outside of this service.
//! Bodies are returned as stored. Fields used for filtering and ordering are read on access, so
//! a malformed document never fails the whole query.

use async_graphql::{Json, Object};
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde_json::{Map, Value};

use crate::model::documents::{Direction, Document, Op, Query};
use crate::model::users::UserId;

pub const INTERVIEWS: &str = "interviews";

/// Default number of interviews returned by [`latest_interviews`]
pub const LATEST_LIMIT: u32 = 20;

/// Interview with its document id
#[derive(Debug, Clone, PartialEq)]
pub struct Interview {
    pub id: String,
    /// Document body as stored
    pub data: Map<String, Value>,
}

impl From<Document<Map<String, Value>>> for Interview {
    fn from(Document { id, data }: Document<Map<String, Value>>) -> Self {
        Self { id, data }
    }
}

impl Interview {
    /// Owner of the interview
    pub fn user_id(&self) -> Option<&str> {
        self.data.get("userId").and_then(Value::as_str)
    }

    /// Finalized interviews are visible to other users
    pub fn finalized(&self) -> bool {
        self.data
            .get("finalized")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Creation time, if stored as a valid RFC 3339 timestamp
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let created_at = self.data.get("createdAt")?.as_str()?;
        DateTime::parse_from_rfc3339(created_at)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }
}

#[Object(name = "Interview")]
impl Interview {
    #[graphql(name = "id")]
    async fn gql_id(&self) -> &str {
        &self.id
    }

    #[graphql(name = "userId")]
    async fn gql_user_id(&self) -> Option<&str> {
        self.user_id()
    }

    #[graphql(name = "finalized")]
    async fn gql_finalized(&self) -> bool {
        self.finalized()
    }

    #[graphql(name = "createdAt")]
    async fn gql_created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at()
    }

    /// Whole interview document as stored
    #[graphql(name = "data")]
    async fn gql_data(&self) -> Json<Map<String, Value>> {
        Json(self.data.clone())
    }
}

/// All interviews of the user, newest first
pub async fn interviews_by_user(
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    user_id: UserId,
) -> Result<Vec<Interview>> {
    let interviews = Query::collection(INTERVIEWS)
        .filter("userId", Op::Eq, user_id.to_string())
        .order_by_time("createdAt", Direction::Descending)
        .fetch(db)
        .await?;

    Ok(interviews.into_iter().map(Interview::from).collect())
}

/// Parameters of [`latest_interviews`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestInterviews {
    /// User whose own interviews are excluded
    pub user_id: UserId,
    /// Maximal number of interviews returned
    pub limit: u32,
}

#[cfg(test)]
impl LatestInterviews {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            limit: LATEST_LIMIT,
        }
    }
}

/// Newest finalized interviews of other users
pub async fn latest_interviews(
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    LatestInterviews { user_id, limit }: LatestInterviews,
) -> Result<Vec<Interview>> {
    let interviews = Query::collection(INTERVIEWS)
        .filter("finalized", Op::Eq, true)
        .filter("userId", Op::Ne, user_id.to_string())
        .order_by_time("createdAt", Direction::Descending)
        .limit(limit)
        .fetch(db)
        .await?;

    Ok(interviews.into_iter().map(Interview::from).collect())
}
