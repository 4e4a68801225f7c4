//! Account related mutations

use async_graphql::{Context, Object, Result};

use crate::model::Model;
use crate::model::accounts::{Accounts, ActionResult, SignUp};
use crate::model::identity::IdToken;
use crate::model::session::Cookies;

#[derive(Debug, Default)]
pub struct AccountsMutations;

#[Object]
impl AccountsMutations {
    /// Creates an account and signs the new user in. The session cookie is set on success.
    async fn sign_up(
        &self,
        ctx: &Context<'_>,
        email: String,
        #[graphql(secret)] password: String,
        name: String,
    ) -> Result<ActionResult> {
        let model: &Model = ctx.data()?;
        let cookies: &Cookies = ctx.data()?;

        let sign_up = SignUp {
            email,
            password,
            name,
        };

        Ok(Accounts::new(model, cookies).sign_up(sign_up).await)
    }

    /// Exchanges an ID token obtained from the identity service for a session
    async fn sign_in(
        &self,
        ctx: &Context<'_>,
        #[graphql(secret)] id_token: IdToken,
    ) -> Result<ActionResult> {
        let model: &Model = ctx.data()?;
        let cookies: &Cookies = ctx.data()?;

        Ok(Accounts::new(model, cookies).sign_in(id_token).await)
    }
}
