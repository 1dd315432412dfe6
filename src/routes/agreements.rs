//! Agreement endpoints under `/convenios`
//!
//! ## Endpoints
//!
//! - `POST /convenios` - create, optionally with nested dimensions
//! - `GET /convenios` - all agreements, without subtrees
//! - `GET /convenios/{id}` - one agreement with its full subtree
//! - `PUT /convenios/{id}` - update; `dimensiones` replaces the subtree
//! - `PATCH /convenios/{id}/finalizar` - mark inactive
//! - `POST /convenios/{convenioId}/dimensiones` - add a dimension
//! - `PUT /convenios/dimensiones/{id}` - update a dimension
//! - `POST /convenios/{dimensionId}/indicadores` - add an indicator
//! - `PATCH /convenios/indicador/{id}` - update an indicator
//! - `POST /convenios/{indicadorId}/tareas` - add a task (JSON or multipart)
//! - `PUT /convenios/tareas/{id}` - update a task (JSON or multipart)
//! - `PUT /convenios/{convenioId}/asignaciones` - reassign responsibles
//! - `GET /convenios/list/director` - agreements created by the caller
//! - `GET /convenios/asignados/gestion` - agreements assigned to the caller
//! - `GET /convenios/descargar-evidencia/{nombre}` - download evidence
//! - `GET /convenios/plantilla` - download the import template
//! - `POST /convenios/importar` - import a filled template
//!
//! Task uploads use the multipart field `evidencia`; imports use `file`.

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::routes::helpers::{
    error_response, file_response, is_multipart, json_response, parse_id, parse_json_body,
    parse_multipart, require_actor, FullBody, MultipartForm,
};
use crate::server::AppState;
use crate::services::evidence::content_type_for;
use crate::services::workbook::{self, TEMPLATE_FILENAME, XLSX_CONTENT_TYPE};
use crate::services::{
    Assignment, CreateAgreementInput, DimensionInput, EvidenceUpload, IndicatorInput, TaskInput,
    UpdateAgreementInput, UpdateDimensionInput, UpdateIndicatorInput, UpdateTaskInput,
};
use crate::types::{ConvenioError, Result};

/// Reassignments arrive either as a bare list or wrapped in `asignaciones`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AssignmentsBody {
    List(Vec<Assignment>),
    Wrapped { asignaciones: Vec<Assignment> },
}

impl AssignmentsBody {
    fn into_inner(self) -> Vec<Assignment> {
        match self {
            Self::List(list) | Self::Wrapped { asignaciones: list } => list,
        }
    }
}

/// Main handler for /convenios routes; `segments` excludes the `convenios` prefix
pub async fn handle_agreements_request<B>(
    req: Request<B>,
    state: &AppState,
    segments: &[&str],
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();

    match (method, segments) {
        (Method::POST, []) => handle_create(req, state).await,
        (Method::GET, []) => Ok(json_response(StatusCode::OK, &state.agreements.list().await?)),

        // Fixed paths take precedence over `/{id}`
        (Method::GET, ["list", "director"]) => {
            let actor = require_actor(req.headers(), state).await?;
            Ok(json_response(
                StatusCode::OK,
                &state.agreements.list_by_creator(&actor).await?,
            ))
        }
        (Method::GET, ["asignados", "gestion"]) => {
            let actor = require_actor(req.headers(), state).await?;
            Ok(json_response(
                StatusCode::OK,
                &state.agreements.list_assigned(&actor).await?,
            ))
        }
        (Method::GET, ["plantilla"]) => handle_template(),
        (Method::POST, ["importar"]) => handle_import(req, state).await,
        (Method::GET, ["descargar-evidencia", name]) => handle_download_evidence(state, name).await,
        (Method::PUT, ["dimensiones", id]) => handle_update_dimension(req, state, parse_id(id)?).await,
        (Method::PATCH, ["indicador", id]) => handle_update_indicator(req, state, parse_id(id)?).await,
        (Method::PUT, ["tareas", id]) => handle_update_task(req, state, parse_id(id)?).await,

        (Method::GET, [id]) => {
            let id = parse_id(id)?;
            Ok(json_response(StatusCode::OK, &state.agreements.get(id).await?))
        }
        (Method::PUT, [id]) => handle_update(req, state, parse_id(id)?).await,
        (Method::PATCH, [id, "finalizar"]) => {
            let id = parse_id(id)?;
            let actor = require_actor(req.headers(), state).await?;
            Ok(json_response(
                StatusCode::OK,
                &state.agreements.finalize(&actor, id).await?,
            ))
        }
        (Method::POST, [id, "dimensiones"]) => handle_add_dimension(req, state, parse_id(id)?).await,
        (Method::POST, [id, "indicadores"]) => handle_add_indicator(req, state, parse_id(id)?).await,
        (Method::POST, [id, "tareas"]) => handle_add_task(req, state, parse_id(id)?).await,
        (Method::PUT, [id, "asignaciones"]) => handle_reassign(req, state, parse_id(id)?).await,

        _ => Ok(error_response(StatusCode::NOT_FOUND, "Not found", "NOT_FOUND")),
    }
}

// =============================================================================
// Agreement handlers
// =============================================================================

async fn handle_create<B>(req: Request<B>, state: &AppState) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let input: CreateAgreementInput = parse_json_body(req).await?;
    let agreement = state.agreements.create(&actor, input).await?;
    Ok(json_response(StatusCode::CREATED, &agreement))
}

async fn handle_update<B>(req: Request<B>, state: &AppState, id: i64) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let input: UpdateAgreementInput = parse_json_body(req).await?;
    let agreement = state.agreements.update(&actor, id, input).await?;
    Ok(json_response(StatusCode::OK, &agreement))
}

async fn handle_reassign<B>(req: Request<B>, state: &AppState, id: i64) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let body: AssignmentsBody = parse_json_body(req).await?;
    let agreement = state
        .agreements
        .reassign_responsibles(&actor, id, body.into_inner())
        .await?;
    Ok(json_response(StatusCode::OK, &agreement))
}

// =============================================================================
// Dimension and indicator handlers
// =============================================================================

async fn handle_add_dimension<B>(
    req: Request<B>,
    state: &AppState,
    agreement_id: i64,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let input: DimensionInput = parse_json_body(req).await?;
    let dimension = state.agreements.add_dimension(&actor, agreement_id, input).await?;
    Ok(json_response(StatusCode::CREATED, &dimension))
}

async fn handle_update_dimension<B>(
    req: Request<B>,
    state: &AppState,
    dimension_id: i64,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let input: UpdateDimensionInput = parse_json_body(req).await?;
    let dimension = state
        .agreements
        .update_dimension(&actor, dimension_id, input)
        .await?;
    Ok(json_response(StatusCode::OK, &dimension))
}

async fn handle_add_indicator<B>(
    req: Request<B>,
    state: &AppState,
    dimension_id: i64,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let input: IndicatorInput = parse_json_body(req).await?;
    let indicator = state.agreements.add_indicator(&actor, dimension_id, input).await?;
    Ok(json_response(StatusCode::CREATED, &indicator))
}

async fn handle_update_indicator<B>(
    req: Request<B>,
    state: &AppState,
    indicator_id: i64,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    let input: UpdateIndicatorInput = parse_json_body(req).await?;
    let indicator = state
        .agreements
        .update_indicator(&actor, indicator_id, input)
        .await?;
    Ok(json_response(StatusCode::OK, &indicator))
}

// =============================================================================
// Task handlers
// =============================================================================

async fn handle_add_task<B>(
    req: Request<B>,
    state: &AppState,
    indicator_id: i64,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;

    let (input, upload) = if is_multipart(&req) {
        let mut form = parse_multipart(req, state.args.max_upload_bytes).await?;
        let upload = evidence_part(&mut form)?;
        let input = TaskInput {
            descripcion: form.text("descripcion").unwrap_or_default(),
            plazo: form.text("plazo"),
            cumplimiento: form.text("cumplimiento"),
            obs: form.text("obs"),
        };
        (input, upload)
    } else {
        (parse_json_body::<TaskInput, _>(req).await?, None)
    };

    let task = state
        .agreements
        .add_task(&actor, indicator_id, input, upload)
        .await?;
    Ok(json_response(StatusCode::CREATED, &task))
}

async fn handle_update_task<B>(
    req: Request<B>,
    state: &AppState,
    task_id: i64,
) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;

    let (input, upload) = if is_multipart(&req) {
        let mut form = parse_multipart(req, state.args.max_upload_bytes).await?;
        let upload = evidence_part(&mut form)?;
        // A present field is a change; an empty one clears
        let input = UpdateTaskInput {
            descripcion: form.text("descripcion"),
            plazo: form.text("plazo").map(Some),
            cumplimiento: form.text("cumplimiento").map(Some),
            evidencias: form.text("evidencias").map(Some),
            obs: form.text("obs").map(Some),
        };
        (input, upload)
    } else {
        (parse_json_body::<UpdateTaskInput, _>(req).await?, None)
    };

    let task = state
        .agreements
        .update_task(&actor, task_id, input, upload)
        .await?;
    Ok(json_response(StatusCode::OK, &task))
}

fn evidence_part(form: &mut MultipartForm) -> Result<Option<EvidenceUpload>> {
    form.take_file("evidencia")
        .map(|file| file.into_evidence())
        .transpose()
}

async fn handle_download_evidence(state: &AppState, raw_name: &str) -> Result<Response<FullBody>> {
    let name = urlencoding::decode(raw_name)
        .map_err(|_| ConvenioError::NotFound(format!("Evidence file {raw_name} not found")))?;
    let data = state.agreements.evidence().load(&name).await?;
    Ok(file_response(content_type_for(&name), data, Some(&name)))
}

// =============================================================================
// Workbook handlers
// =============================================================================

fn handle_template() -> Result<Response<FullBody>> {
    let data = workbook::export_template()?;
    Ok(file_response(
        XLSX_CONTENT_TYPE,
        Bytes::from(data),
        Some(TEMPLATE_FILENAME),
    ))
}

async fn handle_import<B>(req: Request<B>, state: &AppState) -> Result<Response<FullBody>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let actor = require_actor(req.headers(), state).await?;
    if !is_multipart(&req) {
        return Err(ConvenioError::BadRequest(
            "Expected a multipart upload with field `file`".into(),
        ));
    }

    let mut form = parse_multipart(req, state.args.max_upload_bytes).await?;
    let file = form
        .take_file("file")
        .ok_or_else(|| ConvenioError::BadRequest("No file uploaded".into()))?;

    info!(
        actor_id = actor.user_id,
        filename = file.filename.as_deref().unwrap_or(""),
        bytes = file.data.len(),
        "Importing agreement workbook"
    );
    let summary = workbook::import(&state.agreements, &actor, &file.data).await?;
    Ok(json_response(StatusCode::CREATED, &summary))
}
