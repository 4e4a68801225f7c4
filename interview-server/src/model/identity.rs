//! Identity service
//!
//! Keeps account credentials and issues the two kinds of tokens the service works with:
//!
//! * ID tokens - short-living proof of a successful credential check, handed to the client after
//!   a password sign-in.
//! * Session cookies - long-living tokens exchanged for a recent ID token, used to authenticate
//!   every subsequent request.
//!
//! Both are PASETO `v4.public` tokens signed with the service key configured as
//! `identity.private_key`. The footer carries the PASERK id of the signing key, and each kind of
//! token uses its own implicit assertion, so an ID token is never accepted as a session and the
//! other way round. Tokens are bound to the project (`aud`) and the service account (`iss`).
//!
//! Sessions are stateless. Revoking sessions of an user moves their `tokens_valid_after`
//! watermark - sessions issued before it are rejected when verified with revocation check.

use std::time::Duration;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_graphql::scalar;
use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, bail, ensure, eyre};
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::footer::Footer;
use pasetors::keys::{AsymmetricKeyPair, AsymmetricPublicKey, AsymmetricSecretKey, Generate};
use pasetors::paserk::{self, FormatAsPaserk};
use pasetors::token::{TrustedToken, UntrustedToken};
use pasetors::version4::V4;
use pasetors::{Public, public};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Credentials;
use crate::model::users::UserId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid identity signing key")]
    InvalidKey,
    #[error("The email address is already in use")]
    EmailExists,
    #[error("The email address is badly formatted")]
    InvalidEmail,
    #[error("Password should be at least 6 characters")]
    WeakPassword,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Token signed with an unknown key")]
    UnknownKey,
    #[error("Missing token claim {0}")]
    MissingClaim(&'static str),
    #[error("Invalid token claim {0}")]
    InvalidClaim(&'static str),
    #[error("Recent sign in required")]
    StaleSignIn,
    #[error("Session duration must be between 5 minutes and 14 days")]
    InvalidSessionDuration,
    #[error("Session has been revoked")]
    SessionRevoked,
    #[error("User not found")]
    UserNotFound,
}

/// PASETO implicit assertion for ID tokens
const ID_TOKEN_ASSERTION: &[u8] = b"InterviewServiceIdToken";

/// PASETO implicit assertion for session cookies
const SESSION_ASSERTION: &[u8] = b"InterviewServiceSessionCookie";

/// How long an ID token stays valid
const ID_TOKEN_DURATION: Duration = Duration::from_secs(60 * 60);

/// Maximal age in seconds of the credential check behind an ID token exchanged for a session
const RECENT_SIGN_IN_SECS: i64 = 5 * 60;

/// Shortest session a cookie can be created for
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(5 * 60);

/// Longest session a cookie can be created for
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Shortest accepted password
const MIN_PASSWORD_LEN: usize = 6;

/// Newtype for ID token string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdToken(String);

scalar!(IdToken);

impl IdToken {
    /// Wraps a token received from the client
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Newtype for session cookie value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCookie(String);

impl SessionCookie {
    /// Wraps a cookie value received from the client
    pub fn new(cookie: impl Into<String>) -> Self {
        Self(cookie.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verified ID token content
#[derive(Debug, Clone, PartialEq)]
pub struct IdTokenClaims {
    /// Authenticated user
    pub uid: UserId,
    /// When the credentials were checked
    pub auth_time: DateTime<Utc>,
}

/// Verified session cookie content
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    /// Authenticated user
    pub uid: UserId,
    /// When the session was created
    pub issued_at: DateTime<Utc>,
    /// When the session expires
    pub expires_at: DateTime<Utc>,
}

/// Data required to register an identity
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

impl NewIdentity {
    /// Creates the identity in the database
    pub async fn create(
        self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    ) -> Result<IdentityRecord> {
        let Self {
            email,
            password,
            display_name,
        } = self;

        ensure!(is_valid_email(&email), Error::InvalidEmail);
        ensure!(
            password.chars().count() >= MIN_PASSWORD_LEN,
            Error::WeakPassword
        );

        let password_hash = hash_password(&password)?;
        let uid = UserId::generate();
        let created_at = Utc::now();

        let insertion = sqlx::query(
            "insert into identities (id, email, display_name, password_hash, created_at, tokens_valid_after) \
             values (?, ?, ?, ?, ?, ?)",
        )
        .bind(uid)
        .bind(&email)
        .bind(&display_name)
        .bind(password_hash)
        .bind(created_at)
        .bind(created_at)
        .execute(db)
        .await;

        match insertion {
            Ok(_) => Ok(IdentityRecord {
                uid,
                email,
                display_name,
                created_at,
            }),
            Err(err)
                if err
                    .as_database_error()
                    .is_some_and(|err| err.is_unique_violation()) =>
            {
                bail!(Error::EmailExists)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Identity data visible outside of the identity service
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub uid: UserId,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Fetches identity by its id
    #[cfg(test)]
    pub async fn fetch(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        uid: UserId,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as(
            "select id, email, display_name, created_at from identities where id = ?",
        )
        .bind(uid)
        .fetch_optional(db)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// Looks identity up by email
    ///
    /// Emails are compared case-insensitively. `Ok(None)` means the email is free to use.
    pub async fn fetch_by_email(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        email: &str,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as(
            "select id, email, display_name, created_at from identities where email = ?",
        )
        .bind(email)
        .fetch_optional(db)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// Removes the identity
    pub async fn delete(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        uid: UserId,
    ) -> Result<()> {
        sqlx::query("delete from identities where id = ?")
            .bind(uid)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Invalidates all the sessions issued for the user so far
    pub async fn revoke_sessions(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        uid: UserId,
    ) -> Result<()> {
        let revoked = sqlx::query("update identities set tokens_valid_after = ? where id = ?")
            .bind(Utc::now())
            .bind(uid)
            .execute(db)
            .await?;

        ensure!(revoked.rows_affected() > 0, Error::UserNotFound);
        Ok(())
    }

    fn from_row(
        (uid, email, display_name, created_at): (UserId, String, String, DateTime<Utc>),
    ) -> Self {
        Self {
            uid,
            email,
            display_name,
            created_at,
        }
    }
}

/// Token issuer and verifier
pub struct Identity {
    /// Key signing all the tokens
    secret: AsymmetricSecretKey<V4>,
    /// Key verifying all the tokens
    public: AsymmetricPublicKey<V4>,
    /// PASERK id of the signing key, stored in every token footer
    key_id: String,
    /// Token audience
    project_id: String,
    /// Token issuer
    client_email: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("key_id", &self.key_id)
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Builds the identity service from configured credentials
    pub fn new(credentials: Credentials) -> Result<Self> {
        let Credentials {
            project_id,
            client_email,
            private_key,
        } = credentials;

        let secret = AsymmetricSecretKey::<V4>::try_from(private_key.as_str())
            .map_err(|_| Error::InvalidKey)?;
        let public =
            AsymmetricPublicKey::<V4>::try_from(&secret).map_err(|_| Error::InvalidKey)?;

        Self::with_keys(secret, public, project_id, client_email)
    }

    /// Builds the identity service with a freshly generated key
    #[cfg(test)]
    pub fn generate(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
    ) -> Result<Self> {
        let AsymmetricKeyPair { secret, public } = AsymmetricKeyPair::<V4>::generate()?;
        Self::with_keys(secret, public, project_id.into(), client_email.into())
    }

    /// Generates a new signing key, PASERK encoded
    pub fn generate_key() -> Result<String> {
        let key_pair = AsymmetricKeyPair::<V4>::generate()?;
        let mut key = String::new();
        key_pair.secret.fmt(&mut key)?;
        Ok(key)
    }

    fn with_keys(
        secret: AsymmetricSecretKey<V4>,
        public: AsymmetricPublicKey<V4>,
        project_id: String,
        client_email: String,
    ) -> Result<Self> {
        let mut key_id = String::new();
        paserk::Id::from(&public).fmt(&mut key_id)?;

        Ok(Self {
            secret,
            public,
            key_id,
            project_id,
            client_email,
        })
    }

    /// Checks the user credentials, returning an ID token on success
    ///
    /// Unknown email and wrong password are indistinguishable for the caller.
    pub async fn sign_in_with_password(
        &self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        email: &str,
        password: &str,
    ) -> Result<IdToken> {
        let row: Option<(UserId, String)> =
            sqlx::query_as("select id, password_hash from identities where email = ?")
                .bind(email)
                .fetch_optional(db)
                .await?;

        let (uid, password_hash) = row.ok_or(Error::InvalidCredentials)?;
        ensure!(
            verify_password(&password_hash, password),
            Error::InvalidCredentials
        );

        self.mint_id_token(uid)
    }

    /// Issues an ID token for an user whose credentials were just checked
    pub fn mint_id_token(&self, uid: UserId) -> Result<IdToken> {
        self.id_token_authenticated_at(uid, Utc::now())
    }

    fn id_token_authenticated_at(&self, uid: UserId, auth_time: DateTime<Utc>) -> Result<IdToken> {
        let mut claims = claims_valid_for(ID_TOKEN_DURATION)?;
        claims.subject(&uid.to_string())?;
        claims.add_additional("auth_time", auth_time.to_rfc3339())?;

        self.sign(claims, ID_TOKEN_ASSERTION).map(IdToken)
    }

    /// Verifies an ID token
    pub fn verify_id_token(&self, token: &IdToken) -> Result<IdTokenClaims> {
        let token = self.verify(&token.0, ID_TOKEN_ASSERTION)?;
        let claims = token.payload_claims().ok_or(Error::MissingClaim("sub"))?;

        Ok(IdTokenClaims {
            uid: subject(claims)?,
            auth_time: time_claim(claims, "auth_time")?,
        })
    }

    /// Exchanges an ID token for a session cookie valid for `expires_in`
    ///
    /// The ID token has to come from a sign in no older than 5 minutes.
    pub fn create_session_cookie(
        &self,
        token: &IdToken,
        expires_in: Duration,
    ) -> Result<SessionCookie> {
        ensure!(
            (MIN_SESSION_DURATION..=MAX_SESSION_DURATION).contains(&expires_in),
            Error::InvalidSessionDuration
        );

        let IdTokenClaims { uid, auth_time } = self.verify_id_token(token)?;
        ensure!(
            Utc::now() - auth_time <= TimeDelta::seconds(RECENT_SIGN_IN_SECS),
            Error::StaleSignIn
        );

        let mut claims = claims_valid_for(expires_in)?;
        claims.subject(&uid.to_string())?;

        self.sign(claims, SESSION_ASSERTION).map(SessionCookie)
    }

    /// Verifies a session cookie
    ///
    /// With `check_revoked` the identity has to still exist, and the session must not be issued
    /// before the last revocation.
    pub async fn verify_session_cookie(
        &self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        cookie: &SessionCookie,
        check_revoked: bool,
    ) -> Result<SessionClaims> {
        let token = self.verify(&cookie.0, SESSION_ASSERTION)?;
        let claims = token.payload_claims().ok_or(Error::MissingClaim("sub"))?;

        let session = SessionClaims {
            uid: subject(claims)?,
            issued_at: time_claim(claims, "iat")?,
            expires_at: time_claim(claims, "exp")?,
        };

        if check_revoked {
            let (valid_after,): (DateTime<Utc>,) =
                sqlx::query_as("select tokens_valid_after from identities where id = ?")
                    .bind(session.uid)
                    .fetch_optional(db)
                    .await?
                    .ok_or(Error::UserNotFound)?;

            ensure!(session.issued_at >= valid_after, Error::SessionRevoked);
        }

        Ok(session)
    }

    /// Signs claims, binding them to the project and the service account
    fn sign(&self, mut claims: Claims, assertion: &[u8]) -> Result<String> {
        claims.audience(&self.project_id)?;
        claims.issuer(&self.client_email)?;

        let key_id = paserk::Id::from(&self.public);
        let mut footer = Footer::new();
        footer.key_id(&key_id);

        let token = public::sign(&self.secret, &claims, Some(&footer), Some(assertion))?;
        Ok(token)
    }

    /// Verifies token signature, key and standard claims
    fn verify(&self, token: &str, assertion: &[u8]) -> Result<TrustedToken> {
        let token = UntrustedToken::<Public, V4>::try_from(token)?;
        let mut footer = Footer::new();
        footer.parse_bytes(token.untrusted_footer())?;

        let key_id = footer
            .get_claim("kid")
            .ok_or(Error::MissingClaim("kid"))?
            .as_str()
            .ok_or(Error::InvalidClaim("kid"))?;
        ensure!(key_id == self.key_id, Error::UnknownKey);

        let mut rules = ClaimsValidationRules::new();
        rules.validate_audience_with(&self.project_id);
        rules.validate_issuer_with(&self.client_email);

        let token = public::verify(&self.public, &token, &rules, None, Some(assertion))?;
        Ok(token)
    }
}

/// Claims valid from now on for `duration`
///
/// Times keep the sub-second part, so `iat` compares exactly with the `tokens_valid_after`
/// watermark.
fn claims_valid_for(duration: Duration) -> Result<Claims> {
    let now = Utc::now();
    let expires_at = now + TimeDelta::from_std(duration)?;

    let mut claims = Claims::new()?;
    claims.issued_at(&now.to_rfc3339())?;
    claims.not_before(&now.to_rfc3339())?;
    claims.expiration(&expires_at.to_rfc3339())?;
    Ok(claims)
}

/// Retrieves the user id from the `sub` claim
fn subject(claims: &Claims) -> Result<UserId> {
    let uid = claims
        .get_claim("sub")
        .ok_or(Error::MissingClaim("sub"))?
        .as_str()
        .ok_or_eyre(Error::InvalidClaim("sub"))?;

    Ok(uid.parse()?)
}

/// Retrieves RFC 3339 time claim
fn time_claim(claims: &Claims, name: &'static str) -> Result<DateTime<Utc>> {
    let time = claims
        .get_claim(name)
        .ok_or(Error::MissingClaim(name))?
        .as_str()
        .ok_or(Error::InvalidClaim(name))?;

    time.parse().map_err(|_| Error::InvalidClaim(name).into())
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| eyre!("{err}"))?;
    Ok(hash.to_string())
}

fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|hash| {
            Argon2::default()
                .verify_password(password.as_bytes(), &hash)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    const SESSION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_owned(),
            password: "password1".to_owned(),
            display_name: "user".to_owned(),
        }
    }

    mod accounts {
        use super::*;

        #[test]
        fn password_hashes_salted() {
            let first = hash_password("password1").unwrap();
            let second = hash_password("password1").unwrap();
            assert_ne!(first, second);

            assert!(verify_password(&first, "password1"));
            assert!(verify_password(&second, "password1"));
            assert!(!verify_password(&first, "password2"));
        }

        #[tokio::test]
        async fn create_and_lookup() {
            let model = Model::test().await.unwrap();
            let db = model.db();

            let user1 = new_identity("user1@example.com").create(db).await.unwrap();
            let user2 = new_identity("user2@example.com").create(db).await.unwrap();
            assert_ne!(user1.uid, user2.uid);

            let found = IdentityRecord::fetch_by_email(db, "user1@example.com")
                .await
                .unwrap();
            assert_eq!(found, Some(user1.clone()));

            // Emails are case insensitive
            let found = IdentityRecord::fetch_by_email(db, "USER1@example.com")
                .await
                .unwrap();
            assert_eq!(found, Some(user1.clone()));

            let found = IdentityRecord::fetch(db, user2.uid).await.unwrap();
            assert_eq!(found, Some(user2));

            let missing = IdentityRecord::fetch_by_email(db, "user3@example.com")
                .await
                .unwrap();
            assert_eq!(missing, None);
        }

        #[tokio::test]
        async fn duplicate_email_fails() {
            let model = Model::test().await.unwrap();
            let db = model.db();

            new_identity("user1@example.com").create(db).await.unwrap();
            let err = new_identity("User1@Example.com")
                .create(db)
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::EmailExists)
            ));

            let (count,): (i64,) = sqlx::query_as("select count(*) from identities")
                .fetch_one(db)
                .await
                .unwrap();
            assert_eq!(count, 1);
        }

        #[tokio::test]
        async fn invalid_data_rejected() {
            let model = Model::test().await.unwrap();
            let db = model.db();

            for email in ["", "user", "@example.com", "user@", "us er@example.com"] {
                let err = new_identity(email).create(db).await.unwrap_err();
                assert!(
                    matches!(err.downcast_ref::<Error>(), Some(Error::InvalidEmail)),
                    "{email:?} accepted"
                );
            }

            let err = NewIdentity {
                password: "short".to_owned(),
                ..new_identity("user1@example.com")
            }
            .create(db)
            .await
            .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::WeakPassword)
            ));
        }

        #[tokio::test]
        async fn delete_identity() {
            let model = Model::test().await.unwrap();
            let db = model.db();

            let user = new_identity("user1@example.com").create(db).await.unwrap();
            IdentityRecord::delete(db, user.uid).await.unwrap();

            assert_eq!(IdentityRecord::fetch(db, user.uid).await.unwrap(), None);
            // Email is free again
            new_identity("user1@example.com").create(db).await.unwrap();
        }
    }

    mod id_token {
        use super::*;

        #[tokio::test]
        async fn password_sign_in() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            let user = new_identity("user1@example.com").create(db).await.unwrap();

            let token = identity
                .sign_in_with_password(db, "user1@example.com", "password1")
                .await
                .unwrap();
            let claims = identity.verify_id_token(&token).unwrap();
            assert_eq!(claims.uid, user.uid);
            assert!(Utc::now() - claims.auth_time < TimeDelta::minutes(1));
        }

        #[tokio::test]
        async fn wrong_credentials_fail() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            new_identity("user1@example.com").create(db).await.unwrap();

            let err = identity
                .sign_in_with_password(db, "user1@example.com", "password2")
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::InvalidCredentials)
            ));

            let err = identity
                .sign_in_with_password(db, "user2@example.com", "password1")
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::InvalidCredentials)
            ));
        }

        #[tokio::test]
        async fn verify_with_random_data_fails() {
            let model = Model::test().await.unwrap();
            let _ = model
                .identity()
                .verify_id_token(&IdToken::new("fake_token"))
                .unwrap_err();
        }

        #[test]
        fn foreign_tokens_rejected() {
            let identity = Identity::generate("interviews", "service@example.com").unwrap();
            let uid = UserId::generate();

            // Different key
            let other = Identity::generate("interviews", "service@example.com").unwrap();
            let token = other.mint_id_token(uid).unwrap();
            let _ = identity.verify_id_token(&token).unwrap_err();

            // Same key, different project
            let other = Identity {
                project_id: "other".to_owned(),
                ..Identity::new(Credentials {
                    project_id: "interviews".to_owned(),
                    client_email: "service@example.com".to_owned(),
                    private_key: identity_key(&identity),
                })
                .unwrap()
            };
            let token = other.mint_id_token(uid).unwrap();
            let _ = identity.verify_id_token(&token).unwrap_err();
        }

        #[test]
        fn configured_key_round_trip() {
            let key = Identity::generate_key().unwrap();
            let credentials = Credentials {
                project_id: "interviews".to_owned(),
                client_email: "service@example.com".to_owned(),
                private_key: key,
            };

            let first = Identity::new(credentials.clone()).unwrap();
            let second = Identity::new(credentials).unwrap();

            let uid = UserId::generate();
            let token = first.mint_id_token(uid).unwrap();
            assert_eq!(second.verify_id_token(&token).unwrap().uid, uid);
        }

        #[test]
        fn invalid_key_rejected() {
            let err = Identity::new(Credentials {
                project_id: "interviews".to_owned(),
                client_email: "service@example.com".to_owned(),
                private_key: "k4.secret.garbage".to_owned(),
            })
            .unwrap_err();
            assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidKey)));
        }

        fn identity_key(identity: &Identity) -> String {
            let mut key = String::new();
            identity.secret.fmt(&mut key).unwrap();
            key
        }
    }

    mod session_cookie {
        use super::*;

        #[tokio::test]
        async fn verify_with_created_cookie() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            let user1 = new_identity("user1@example.com").create(db).await.unwrap();
            let user2 = new_identity("user2@example.com").create(db).await.unwrap();

            let token1 = identity.mint_id_token(user1.uid).unwrap();
            let cookie1 = identity.create_session_cookie(&token1, SESSION).unwrap();
            let token2 = identity.mint_id_token(user2.uid).unwrap();
            let cookie2 = identity.create_session_cookie(&token2, SESSION).unwrap();
            // Also multiple sessions for single user
            let cookie3 = identity.create_session_cookie(&token2, SESSION).unwrap();

            let session = identity
                .verify_session_cookie(db, &cookie1, true)
                .await
                .unwrap();
            assert_eq!(session.uid, user1.uid);
            let lifetime = session.expires_at - session.issued_at;
            assert!((lifetime - TimeDelta::days(7)).abs() < TimeDelta::seconds(1));

            let session = identity
                .verify_session_cookie(db, &cookie2, true)
                .await
                .unwrap();
            assert_eq!(session.uid, user2.uid);

            let session = identity
                .verify_session_cookie(db, &cookie3, true)
                .await
                .unwrap();
            assert_eq!(session.uid, user2.uid);
        }

        #[tokio::test]
        async fn verify_with_random_data_fails() {
            let model = Model::test().await.unwrap();
            let _ = model
                .identity()
                .verify_session_cookie(model.db(), &SessionCookie::new("fake_token"), true)
                .await
                .unwrap_err();
        }

        #[tokio::test]
        async fn tokens_are_not_interchangeable() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            let user = new_identity("user1@example.com").create(db).await.unwrap();
            let token = identity.mint_id_token(user.uid).unwrap();
            let cookie = identity.create_session_cookie(&token, SESSION).unwrap();

            let _ = identity
                .verify_session_cookie(db, &SessionCookie::new(token.as_str()), false)
                .await
                .unwrap_err();
            let _ = identity
                .verify_id_token(&IdToken::new(cookie.as_str()))
                .unwrap_err();
        }

        #[tokio::test]
        async fn stale_sign_in_rejected() {
            let model = Model::test().await.unwrap();
            let identity = model.identity();

            let token = identity
                .id_token_authenticated_at(UserId::generate(), Utc::now() - TimeDelta::minutes(10))
                .unwrap();
            let err = identity.create_session_cookie(&token, SESSION).unwrap_err();
            assert!(matches!(err.downcast_ref::<Error>(), Some(Error::StaleSignIn)));
        }

        #[tokio::test]
        async fn session_duration_bounds() {
            let model = Model::test().await.unwrap();
            let identity = model.identity();
            let token = identity.mint_id_token(UserId::generate()).unwrap();

            for duration in [
                Duration::from_secs(60),
                MAX_SESSION_DURATION + Duration::from_secs(1),
            ] {
                let err = identity
                    .create_session_cookie(&token, duration)
                    .unwrap_err();
                assert!(matches!(
                    err.downcast_ref::<Error>(),
                    Some(Error::InvalidSessionDuration)
                ));
            }

            identity
                .create_session_cookie(&token, MIN_SESSION_DURATION)
                .unwrap();
            identity
                .create_session_cookie(&token, MAX_SESSION_DURATION)
                .unwrap();
        }

        #[tokio::test]
        async fn expired_session_rejected() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            let user = new_identity("user1@example.com").create(db).await.unwrap();

            let mut claims = Claims::new().unwrap();
            claims.subject(&user.uid.to_string()).unwrap();
            claims.issued_at("2020-01-01T00:00:00+00:00").unwrap();
            claims.not_before("2020-01-01T00:00:00+00:00").unwrap();
            claims.expiration("2020-01-08T00:00:00+00:00").unwrap();
            let cookie = SessionCookie(identity.sign(claims, SESSION_ASSERTION).unwrap());

            let _ = identity
                .verify_session_cookie(db, &cookie, false)
                .await
                .unwrap_err();
        }

        #[tokio::test]
        async fn revoked_sessions_rejected() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            let user = new_identity("user1@example.com").create(db).await.unwrap();
            let token = identity.mint_id_token(user.uid).unwrap();
            let cookie = identity.create_session_cookie(&token, SESSION).unwrap();

            IdentityRecord::revoke_sessions(db, user.uid).await.unwrap();

            let err = identity
                .verify_session_cookie(db, &cookie, true)
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::SessionRevoked)
            ));

            // Without the check the signature is all that matters
            identity
                .verify_session_cookie(db, &cookie, false)
                .await
                .unwrap();

            // Sessions created right after revocation are fine
            let token = identity.mint_id_token(user.uid).unwrap();
            let cookie = identity.create_session_cookie(&token, SESSION).unwrap();
            identity
                .verify_session_cookie(db, &cookie, true)
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn session_of_new_identity_is_valid() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            for n in 0..5 {
                let user = new_identity(&format!("user{n}@example.com"))
                    .create(db)
                    .await
                    .unwrap();
                let token = identity.mint_id_token(user.uid).unwrap();
                let cookie = identity.create_session_cookie(&token, SESSION).unwrap();

                let session = identity
                    .verify_session_cookie(db, &cookie, true)
                    .await
                    .unwrap();
                assert_eq!(session.uid, user.uid);
                assert!(session.issued_at >= user.created_at);
            }
        }

        #[tokio::test]
        async fn deleted_user_sessions_rejected() {
            let model = Model::test().await.unwrap();
            let db = model.db();
            let identity = model.identity();

            let user = new_identity("user1@example.com").create(db).await.unwrap();
            let token = identity.mint_id_token(user.uid).unwrap();
            let cookie = identity.create_session_cookie(&token, SESSION).unwrap();

            IdentityRecord::delete(db, user.uid).await.unwrap();

            let err = identity
                .verify_session_cookie(db, &cookie, true)
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::UserNotFound)
            ));
        }
    }
}
