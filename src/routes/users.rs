//! User endpoints
//!
//! - `POST /usuario/registro` - register (admin role needs an admin token)
//! - `GET /usuario` - list all users
//! - `PUT /usuario/{id}` - update (self or admin)
//! - `DELETE /usuario/{id}` - delete (admin)
//! - `GET /usuario/gestion-establecimiento/{id}` - management users of an org unit

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};

use crate::routes::helpers::{
    json_response, parse_id, parse_json_body, require_actor, FullBody, MessageResponse,
};
use crate::server::AppState;
use crate::services::{RegisterUserInput, UpdateUserInput};
use crate::types::Result;

pub async fn handle_register<B>(req: Request<B>, state: &AppState) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // Anonymous unless a token is sent; only admins may create admins
    let registrar = if req.headers().contains_key(hyper::header::AUTHORIZATION) {
        Some(require_actor(req.headers(), state).await?)
    } else {
        None
    };
    let input: RegisterUserInput = parse_json_body(req).await?;
    let user = state.users.register(registrar.as_ref(), input).await?;
    Ok(json_response(StatusCode::CREATED, &user))
}

pub async fn handle_list(state: &AppState) -> Result<Response<FullBody>> {
    Ok(json_response(StatusCode::OK, &state.users.list().await?))
}

pub async fn handle_update<B>(
    req: Request<B>,
    state: &AppState,
    id: &str,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let id = parse_id(id)?;
    let actor = require_actor(req.headers(), state).await?;
    let input: UpdateUserInput = parse_json_body(req).await?;
    let user = state.users.update(&actor, id, input).await?;
    Ok(json_response(StatusCode::OK, &user))
}

pub async fn handle_delete<B>(
    req: Request<B>,
    state: &AppState,
    id: &str,
) -> Result<Response<FullBody>> {
    let id = parse_id(id)?;
    let actor = require_actor(req.headers(), state).await?;
    state.users.delete(&actor, id).await?;
    Ok(json_response(
        StatusCode::OK,
        &MessageResponse {
            message: format!("User {id} deleted"),
        },
    ))
}

pub async fn handle_management_users(state: &AppState, org_unit_id: &str) -> Result<Response<FullBody>> {
    let org_unit_id = parse_id(org_unit_id)?;
    Ok(json_response(
        StatusCode::OK,
        &state.users.management_users(org_unit_id).await?,
    ))
}
