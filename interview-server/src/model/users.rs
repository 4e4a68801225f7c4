//! User profiles

use async_graphql::{SimpleObject, scalar};
use chrono::{DateTime, Utc};
use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};
use sqlx::prelude::Type;
use thiserror::Error;
use uuid::Uuid;

use crate::model::documents::{self, Document};

/// Collection holding profile documents, keyed by the user id
pub const USERS: &str = "users";

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid user id format")]
    InvalidUserId,
}

/// Newtype for user id
///
/// Assigned by the identity service, and reused as the profile document key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(Uuid);

scalar!(UserId);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|_| Error::InvalidUserId)?;
        Ok(Self(id))
    }
}

impl UserId {
    /// Generates a fresh user id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Fetches `User` with this id from the profiles collection
    pub async fn fetch(
        self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    ) -> Result<Option<User>> {
        User::fetch(db, self).await
    }
}

/// Profile document body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Display name
    pub name: String,
    /// Contact email, the same as the identity one
    pub email: String,
    /// Profile creation time
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    /// Optional avatar
    #[serde(
        rename = "profileURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_url: Option<String>,
}

impl Profile {
    /// Creates a profile stamped with the current time
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            created_at: Utc::now(),
            profile_url: None,
        }
    }

    /// Writes the profile document for the given user
    pub async fn store(
        &self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<()> {
        documents::set(db, USERS, &user_id.to_string(), self).await
    }
}

/// User queryable data
#[derive(Debug, Clone, PartialEq, SimpleObject)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// Optional avatar
    #[graphql(name = "profileURL")]
    pub profile_url: Option<String>,
}

impl User {
    fn from_profile(id: UserId, profile: Profile) -> Self {
        let Profile {
            name,
            email,
            created_at,
            profile_url,
        } = profile;

        Self {
            id,
            name,
            email,
            created_at,
            profile_url,
        }
    }

    /// Fetches user profile from the database
    ///
    /// Returns `None` if there is no profile document for the user.
    pub async fn fetch(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<Option<Self>> {
        let document: Option<Document<Profile>> =
            documents::get(db, USERS, &user_id.to_string()).await?;

        Ok(document.map(|document| Self::from_profile(user_id, document.data)))
    }
}

/// Timestamps stored in documents
///
/// Always formatted with millisecond precision and `Z` suffix, so the stored strings sort the same
/// way as the times they represent.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(time: &DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let time = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&time)
            .map(|time| time.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
