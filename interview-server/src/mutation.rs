//! Mutations main entry point

use async_graphql::Object;
use derivative::Derivative;

mod accounts;

#[derive(Debug, Derivative)]
#[derivative(Default = "new")]
pub struct Mutation {
    /// Account related mutations
    accounts: accounts::AccountsMutations,
}

#[Object]
impl Mutation {
    async fn accounts(&self) -> &accounts::AccountsMutations {
        &self.accounts
    }
}
