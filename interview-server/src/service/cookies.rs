//! Per-request cookie jar

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::ErrorInternalServerError;
use actix_web::middleware::Next;
use actix_web::{Error, HttpMessage};

use crate::model::session::{Cookies, SESSION_COOKIE};

/// Makes the request session cookie available to handlers as [`Cookies`] and sends back every
/// cookie they changed
pub async fn middleware<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<B>, Error>
where
    B: MessageBody + 'static,
{
    let session = req.cookie(SESSION_COOKIE);
    let cookies = Cookies::new(session.as_ref().map(|cookie| cookie.value()));
    req.extensions_mut().insert(cookies.clone());

    let mut response = next.call(req).await?;
    for cookie in cookies.changes().await {
        response
            .response_mut()
            .add_cookie(&cookie)
            .map_err(ErrorInternalServerError)?;
    }

    Ok(response)
}
