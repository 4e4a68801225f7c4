//! Account actions
//!
//! Actions never fail - any error is logged and reported back as the unsuccessful
//! [`ActionResult`] with a message meant for the user.

use async_graphql::SimpleObject;
use color_eyre::Result;
use tracing::{error, info, instrument};

use crate::model::Model;
use crate::model::identity::{IdToken, IdentityRecord, NewIdentity};
use crate::model::session::{Cookies, Redirect, SessionManager};
use crate::model::users::{Profile, User, UserId};

/// Message reported when signing up with a registered email
pub const EMAIL_IN_USE: &str = "The email address is already in use";

/// Outcome of an account action
#[derive(Debug, Clone, PartialEq, Eq, SimpleObject)]
pub struct ActionResult {
    /// Whether the action succeeded
    pub success: bool,
    /// Message for the user
    pub message: String,
}

impl ActionResult {
    fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Sign up form data
#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Account actions for a single request
pub struct Accounts<'a> {
    model: &'a Model,
    session: SessionManager<'a>,
}

impl<'a> Accounts<'a> {
    pub fn new(model: &'a Model, cookies: &'a Cookies) -> Self {
        Self {
            model,
            session: SessionManager::new(model, cookies),
        }
    }

    /// Creates the account and signs the new user in
    #[instrument(skip_all, fields(email = %sign_up.email))]
    pub async fn sign_up(&self, sign_up: SignUp) -> ActionResult {
        match IdentityRecord::fetch_by_email(self.model.db(), &sign_up.email).await {
            Ok(None) => (),
            Ok(Some(_)) => return ActionResult::failed(EMAIL_IN_USE),
            Err(err) => {
                error!(%err, "Sign up failed");
                return ActionResult::failed(err.to_string());
            }
        }

        match self.create_account(sign_up).await {
            Ok(user) => {
                info!(%user, "Account created");
                ActionResult::succeeded("Account created successfully!")
            }
            Err(err) => {
                error!(%err, "Sign up failed");
                ActionResult::failed(err.to_string())
            }
        }
    }

    async fn create_account(&self, sign_up: SignUp) -> Result<UserId> {
        let SignUp {
            email,
            password,
            name,
        } = sign_up;
        let db = self.model.db();

        let identity = NewIdentity {
            email: email.clone(),
            password,
            display_name: name.clone(),
        }
        .create(db)
        .await?;

        if let Err(err) = Profile::new(name, email).store(db, identity.uid).await {
            // Identity without profile would block the email forever
            if let Err(err) = IdentityRecord::delete(db, identity.uid).await {
                error!(%err, user = %identity.uid, "Removing orphaned identity failed");
            }
            return Err(err);
        }

        let token = self.model.identity().mint_id_token(identity.uid)?;
        self.session.issue(&token).await?;

        Ok(identity.uid)
    }

    /// Signs in with an ID token obtained from the identity service
    #[instrument(skip_all)]
    pub async fn sign_in(&self, token: IdToken) -> ActionResult {
        let result = async {
            let claims = self.model.identity().verify_id_token(&token)?;
            self.session.issue(&token).await?;
            Ok::<_, color_eyre::Report>(claims.uid)
        }
        .await;

        match result {
            Ok(user) => {
                info!(%user, "Signed in");
                ActionResult::succeeded("Signed in successfully!")
            }
            Err(err) => {
                error!(%err, "Sign in failed");
                ActionResult::failed(err.to_string())
            }
        }
    }

    /// Ends the session
    pub async fn sign_out(&self) -> Redirect {
        self.session.clear().await
    }

    /// Currently signed in user
    pub async fn current_user(&self) -> Option<User> {
        self.session.current_user().await
    }

    /// Checks if the user is signed in
    pub async fn is_authenticated(&self) -> bool {
        self.session.is_authenticated().await
    }
}
