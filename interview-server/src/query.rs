//! Main query entry point

use async_graphql::{Context, Object, Result};
use derivative::Derivative;

mod interviews;

use crate::model::Model;
use crate::model::accounts::Accounts;
use crate::model::session::Cookies;
use crate::model::users::User;

#[derive(Debug, Derivative)]
#[derivative(Default = "new")]
pub struct Query {
    /// Interview related queries
    interviews: interviews::InterviewsQueries,
}

#[Object]
impl Query {
    /// Currently signed in user, `null` for anonymous requests
    async fn me(&self, ctx: &Context<'_>) -> Result<Option<User>> {
        let model: &Model = ctx.data()?;
        let cookies: &Cookies = ctx.data()?;

        Ok(Accounts::new(model, cookies).current_user().await)
    }

    /// Checks if the request comes from a signed in user
    async fn authenticated(&self, ctx: &Context<'_>) -> Result<bool> {
        let model: &Model = ctx.data()?;
        let cookies: &Cookies = ctx.data()?;

        Ok(Accounts::new(model, cookies).is_authenticated().await)
    }

    async fn interviews(&self) -> &interviews::InterviewsQueries {
        &self.interviews
    }
}
