//! Utilities for services building

use actix_web::error::{ErrorInternalServerError, ErrorUnauthorized};
use actix_web::http::header;
use actix_web::web::{Data, Json, ServiceConfig};
use actix_web::{HttpMessage, middleware, route};
use actix_web::{HttpRequest, HttpResponse, Result, get, post, web};
use async_graphql::EmptySubscription;
use async_graphql::http::GraphiQLSource;
use async_graphql_actix_web::{GraphQLRequest, GraphQLResponse};
use serde::{Deserialize, Serialize};
use tracing::warn;


mod cookies;

use crate::model::Model;
use crate::model::accounts::Accounts;
use crate::model::identity::{self, IdToken};
use crate::model::session::{Cookies, Redirect};
use crate::mutation::Mutation;
use crate::query::Query;

/// Root GraphQL schema
pub type Schema = async_graphql::Schema<Query, Mutation, EmptySubscription>;

/// Cookie jar attached by the cookie middleware
fn request_cookies(req: &HttpRequest) -> Cookies {
    req.extensions()
        .get::<Cookies>()
        .cloned()
        .unwrap_or_default()
}

/// Ends the session and sends the client to the login page
#[route("/sign-out", method = "GET", method = "POST")]
async fn sign_out(req: HttpRequest, model: Data<Model>) -> HttpResponse {
    let cookies = request_cookies(&req);
    let Redirect(location) = Accounts::new(&model, &cookies).sign_out().await;

    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, location))
        .finish()
}

#[derive(Debug, Deserialize)]
struct PasswordSignIn {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedIn {
    id_token: IdToken,
}

/// Password sign in against the identity service, returning an ID token to be exchanged for a
/// session with the `signIn` mutation
#[post("/identity/sign-in")]
async fn identity_sign_in(
    model: Data<Model>,
    credentials: Json<PasswordSignIn>,
) -> Result<Json<SignedIn>> {
    let PasswordSignIn { email, password } = credentials.into_inner();

    match model
        .identity()
        .sign_in_with_password(model.db(), &email, &password)
        .await
    {
        Ok(id_token) => Ok(Json(SignedIn { id_token })),
        Err(err) => match err.downcast_ref::<identity::Error>() {
            Some(err @ identity::Error::InvalidCredentials) => {
                warn!(%err, %email, "Password sign in rejected");
                Err(ErrorUnauthorized(err.to_string()))
            }
            _ => Err(ErrorInternalServerError(err.to_string())),
        },
    }
}

/// ActixWeb GraphQL endpoint
#[post("/api")]
async fn api(
    schema: web::Data<Schema>,
    req: HttpRequest,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let request = request.into_inner().data(request_cookies(&req));
    schema.execute(request).await.into()
}

/// ActixWeb GraphQLi endpoint
#[get("/pg")]
async fn graphiql() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(GraphiQLSource::build().endpoint("/api").finish()))
}

/// Returns configuration function for the ActixWeb services
pub async fn configure(
    graphiql_enabled: bool,
    model: Model,
) -> color_eyre::Result<impl Fn(&mut web::ServiceConfig) + Clone> {
    let cfg = move |cfg: &mut ServiceConfig| {
        cfg.app_data(Data::new(model.schema()))
            .app_data(Data::new(model.clone()));

        if graphiql_enabled {
            cfg.service(graphiql);
        }

        cfg.service(
            web::scope("")
                .wrap(middleware::from_fn(cookies::middleware))
                .service(api)
                .service(sign_out)
                .service(identity_sign_in),
        );
    };

    Ok(cfg)
}
