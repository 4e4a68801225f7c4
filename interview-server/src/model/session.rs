//! Session management
//!
//! The session lives in the `session` cookie holding a session token issued by the identity
//! service. The cookie is the only thing deciding if the request is anonymous or authenticated.

use std::sync::Arc;
use std::time::Duration;

use actix_web::cookie::{Cookie, CookieJar, SameSite, time};
use color_eyre::Result;
use tokio::sync::Mutex;
use tracing::{error, instrument, warn};

use crate::model::Model;
use crate::model::identity::{IdToken, SessionCookie};
use crate::model::users::User;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Session lifetime in seconds
pub const SESSION_SECONDS: i64 = 60 * 60 * 24 * 7;

/// Session lifetime
pub const SESSION_DURATION: Duration = Duration::from_secs(SESSION_SECONDS as u64);

/// Where the client is sent after signing out
pub const LOGIN_ROUTE: &str = "/login";

/// Cookies of the request being handled
///
/// Created from the incoming request and shared by everything handling it. Cookies added while
/// handling the request are returned by [`Cookies::changes`], to be sent back in `Set-Cookie`
/// headers.
#[derive(Debug, Clone, Default)]
pub struct Cookies(Arc<Mutex<CookieJar>>);

impl Cookies {
    /// Builds the jar from the session cookie value sent with the request
    pub fn new(session: Option<&str>) -> Self {
        let mut jar = CookieJar::new();
        if let Some(session) = session {
            jar.add_original(Cookie::new(SESSION_COOKIE, session.to_owned()));
        }

        Self(Arc::new(Mutex::new(jar)))
    }

    /// Current session cookie value, including one set while handling the request
    pub async fn session(&self) -> Option<SessionCookie> {
        self.0
            .lock()
            .await
            .get(SESSION_COOKIE)
            .map(Cookie::value)
            .filter(|value| !value.is_empty())
            .map(SessionCookie::new)
    }

    /// Cookies to be set on the response
    pub async fn changes(&self) -> Vec<Cookie<'static>> {
        self.0.lock().await.delta().cloned().collect()
    }

    async fn add(&self, cookie: Cookie<'static>) {
        self.0.lock().await.add(cookie);
    }
}

/// Redirection the client should follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect(pub &'static str);

/// Session operations for a single request
pub struct SessionManager<'a> {
    model: &'a Model,
    cookies: &'a Cookies,
}

impl<'a> SessionManager<'a> {
    pub fn new(model: &'a Model, cookies: &'a Cookies) -> Self {
        Self { model, cookies }
    }

    /// Exchanges a verified ID token for a session and stores it in the cookie
    #[instrument(skip_all)]
    pub async fn issue(&self, token: &IdToken) -> Result<()> {
        let session = self
            .model
            .identity()
            .create_session_cookie(token, SESSION_DURATION)?;

        let cookie = self.cookie(session.to_string());
        self.cookies.add(cookie).await;
        Ok(())
    }

    /// Resolves the session cookie to the signed in user
    ///
    /// Missing cookie, failed verification and missing profile all result in `None`.
    #[instrument(skip_all)]
    pub async fn current_user(&self) -> Option<User> {
        let cookie = self.cookies.session().await?;
        let db = self.model.db();

        let session = match self
            .model
            .identity()
            .verify_session_cookie(db, &cookie, true)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(%err, "Session verification failed");
                return None;
            }
        };

        match session.uid.fetch(db).await {
            Ok(user) => user,
            Err(err) => {
                error!(%err, user = %session.uid, "Fetching user profile failed");
                None
            }
        }
    }

    /// Checks if the request comes from a signed in user
    pub async fn is_authenticated(&self) -> bool {
        self.current_user().await.is_some()
    }

    /// Removes the session cookie, returning the login redirection
    ///
    /// Removal cookie is sent even if there was no session.
    pub async fn clear(&self) -> Redirect {
        let mut cookie = self.cookie(String::new());
        cookie.make_removal();
        self.cookies.add(cookie).await;

        Redirect(LOGIN_ROUTE)
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, value)
            .http_only(true)
            .secure(self.model.secure_cookies())
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(SESSION_SECONDS))
            .finish()
    }
}
