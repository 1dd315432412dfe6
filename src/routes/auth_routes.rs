//! Authentication endpoints
//!
//! - `POST /auth/login` - exchange email and password for a JWT
//! - `GET /auth/me` - profile of the bearer of the token

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::TokenInput;
use crate::routes::helpers::{json_response, parse_json_body, require_actor, FullBody};
use crate::server::AppState;
use crate::services::UserView;
use crate::types::Result;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
    pub user: UserView,
}

/// POST /auth/login
pub async fn handle_login<B>(req: Request<B>, state: &AppState) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body: LoginRequest = parse_json_body(req).await?;
    let user = state.users.authenticate(&body.email, &body.password).await?;

    let access_token = state.jwt.generate_token(TokenInput {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role,
        org_unit_id: user.org_unit_id,
    })?;

    info!(user_id = user.id, role = %user.role, "User logged in");
    Ok(json_response(
        StatusCode::OK,
        &LoginResponse {
            access_token,
            expires_in: state.jwt.expiry_seconds(),
            user: UserView::from(&user),
        },
    ))
}

/// GET /auth/me
pub async fn handle_me<B>(req: Request<B>, state: &AppState) -> Result<Response<FullBody>> {
    let actor = require_actor(req.headers(), state).await?;
    let user = state.users.get(actor.user_id).await?;
    Ok(json_response(StatusCode::OK, &user))
}
