//! Org unit endpoints under `/establecimientos`

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;

use crate::routes::helpers::{json_response, parse_id, parse_json_body, require_actor, FullBody};
use crate::server::AppState;
use crate::types::Result;

#[derive(Debug, Deserialize)]
pub struct CreateOrgUnitRequest {
    pub nombre: String,
}

/// POST /establecimientos
pub async fn handle_create<B>(req: Request<B>, state: &AppState) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    require_actor(req.headers(), state).await?;
    let body: CreateOrgUnitRequest = parse_json_body(req).await?;
    let org_unit = state.org_units.create(&body.nombre).await?;
    Ok(json_response(StatusCode::CREATED, &org_unit))
}

pub async fn handle_list(state: &AppState) -> Result<Response<FullBody>> {
    Ok(json_response(StatusCode::OK, &state.org_units.list().await?))
}

pub async fn handle_get(state: &AppState, id: &str) -> Result<Response<FullBody>> {
    let id = parse_id(id)?;
    Ok(json_response(StatusCode::OK, &state.org_units.get(id).await?))
}
