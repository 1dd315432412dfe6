//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection. Routing is a
//! plain match on method and path segments.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::HeaderValue;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::routes::{self, auth_routes, org_units, users, FullBody};
use crate::services::{AgreementService, EvidenceStore, OrgUnitService, UserService};
use crate::store::Store;
use crate::types::{ConvenioError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn Store>,
    /// "mongodb" or "memory", reported by /health
    pub store_backend: &'static str,
    pub jwt: JwtValidator,
    pub users: UserService,
    pub org_units: OrgUnitService,
    pub agreements: AgreementService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, store: Arc<dyn Store>, store_backend: &'static str) -> Result<Self> {
        let secret = args.effective_jwt_secret().ok_or_else(|| {
            ConvenioError::Config("JWT_SECRET is required in production mode".into())
        })?;
        let jwt = JwtValidator::new(secret, args.jwt_expiry_seconds)?;
        let evidence = EvidenceStore::new(args.evidence_dir.clone());

        Ok(Self {
            users: UserService::new(Arc::clone(&store)),
            org_units: OrgUnitService::new(Arc::clone(&store)),
            agreements: AgreementService::new(Arc::clone(&store), evidence),
            args,
            store,
            store_backend,
            jwt,
            started_at: Instant::now(),
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        listen = %state.args.listen,
        store = state.store_backend,
        evidence_dir = %state.args.evidence_dir.display(),
        "Convenios listening"
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - do not use in production");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Log, route and decorate one request
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = if method == Method::OPTIONS {
        cors_preflight()
    } else {
        route(&state, req).await
    };
    apply_cors(&mut response, &state.args.cors_origin);

    info!(
        client = %addr,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request"
    );
    Ok(response)
}

/// Dispatch a request to its handler
pub async fn route<B>(state: &AppState, req: Request<B>) -> Response<FullBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let result = match (method, segments.as_slice()) {
        (Method::GET, ["health"]) => Ok(routes::health_check(state)),
        (Method::GET, ["version"]) => Ok(routes::version_info()),

        (Method::POST, ["auth", "login"]) => auth_routes::handle_login(req, state).await,
        (Method::GET, ["auth", "me"]) => auth_routes::handle_me(req, state).await,

        (Method::POST, ["usuario", "registro"]) => users::handle_register(req, state).await,
        (Method::GET, ["usuario"]) => users::handle_list(state).await,
        (Method::GET, ["usuario", "gestion-establecimiento", id]) => {
            users::handle_management_users(state, id).await
        }
        (Method::PUT, ["usuario", id]) => users::handle_update(req, state, id).await,
        (Method::DELETE, ["usuario", id]) => users::handle_delete(req, state, id).await,

        (Method::POST, ["establecimientos"]) => org_units::handle_create(req, state).await,
        (Method::GET, ["establecimientos"]) => org_units::handle_list(state).await,
        (Method::GET, ["establecimientos", id]) => org_units::handle_get(state, id).await,

        (_, ["convenios", rest @ ..]) => {
            routes::handle_agreements_request(req, state, rest).await
        }

        _ => Ok(not_found_response(&path)),
    };

    routes::respond(result)
}

fn not_found_response(path: &str) -> Response<FullBody> {
    routes::error_response(
        StatusCode::NOT_FOUND,
        &format!("Route {path} not found"),
        "NOT_FOUND",
    )
}

fn cors_preflight() -> Response<FullBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Max-Age", "86400")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn apply_cors(response: &mut Response<FullBody>, origin: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert("Access-Control-Allow-Origin", value);
    }
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        "Access-Control-Expose-Headers",
        HeaderValue::from_static("Content-Disposition"),
    );
}
