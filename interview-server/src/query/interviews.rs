//! Interview queries

use async_graphql::{Context, Object, Result};
use tracing::instrument;

use crate::model::Model;
use crate::model::interviews::{self, Interview, LATEST_LIMIT, LatestInterviews};
use crate::model::users::UserId;

#[derive(Debug, Default)]
pub struct InterviewsQueries;

#[Object]
impl InterviewsQueries {
    /// All interviews of the user, newest first
    #[instrument(skip(self, ctx))]
    async fn by_user(&self, ctx: &Context<'_>, user_id: UserId) -> Result<Vec<Interview>> {
        let model: &Model = ctx.data()?;
        Ok(interviews::interviews_by_user(model.db(), user_id).await?)
    }

    /// Newest finalized interviews of users other than the given one
    #[instrument(skip(self, ctx))]
    async fn latest(
        &self,
        ctx: &Context<'_>,
        user_id: UserId,
        #[graphql(default_with = "LATEST_LIMIT")] limit: u32,
    ) -> Result<Vec<Interview>> {
        let model: &Model = ctx.data()?;
        let params = LatestInterviews { user_id, limit };

        Ok(interviews::latest_interviews(model.db(), params).await?)
    }
}
