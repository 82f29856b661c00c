//! Purpose: Provide the HTTP/JSON front end for the table file.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server mapping `GET /pokemon/:name` and `POST /pokemon` onto the catalog.
//! Invariants: Every request decodes the file afresh; no state survives between requests.
//! Invariants: Errors map to status codes by kind (400 usage, 404 missing, 500 read/parse/write).
//! Invariants: Loopback-only unless explicitly allowed.
//! Notes: File work runs on the blocking pool; writes are serialized by the store's write mode.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use luadex::api::{
    Catalog, DecodeOptions, Entry, Error, ErrorKind, FileStore, WriteMode, encode_entry_inline,
};

const LIVENESS_TEXT: &str = "Hello, World! The Pokémon API is running.";

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub file: PathBuf,
    pub decode: DecodeOptions,
    pub write_mode: WriteMode,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

#[derive(Clone)]
struct AppState {
    catalog: Catalog,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let store = FileStore::new(&config.file)
        .with_decode_options(config.decode)
        .with_write_mode(config.write_mode);
    let state = Arc::new(AppState {
        catalog: Catalog::new(store),
    });

    let app = Router::new()
        .route("/", get(liveness))
        .route("/pokemon", post(upsert_entry))
        .route("/pokemon/:name", get(get_entry))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(
        bind = %config.bind,
        file = %config.file.display(),
        write_mode = ?config.write_mode,
        "API is running"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Internal).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn run_blocking<T, F>(work: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("request worker failed")
            .with_source(err)
    })?
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryFormat {
    Json,
    Lua,
}

impl EntryFormat {
    fn parse(input: Option<&str>) -> Result<Self, Error> {
        match input {
            None | Some("json") => Ok(EntryFormat::Json),
            Some("lua") => Ok(EntryFormat::Lua),
            Some(other) => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported format '{other}'"))
                .with_hint("Use format=json or format=lua.")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EntryQuery {
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpsertRequest {
    name: Option<String>,
    data: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Query(query): Query<EntryQuery>,
) -> Response {
    let format = match EntryFormat::parse(query.format.as_deref()) {
        Ok(format) => format,
        Err(err) => return error_response(err),
    };
    let catalog = state.catalog.clone();
    let result = run_blocking(move || catalog.require(&name)).await;
    match result {
        Ok(entry) => match format {
            EntryFormat::Json => Json(entry).into_response(),
            EntryFormat::Lua => lua_response(&entry),
        },
        Err(err) => error_response(err),
    }
}

async fn upsert_entry(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpsertRequest>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => return rejection_response(rejection),
    };
    let (name, data) = match validate_upsert(payload) {
        Ok(parts) => parts,
        Err(err) => return error_response(err),
    };

    let catalog = state.catalog.clone();
    let target = name.clone();
    let result = run_blocking(move || catalog.upsert_json(&target, &data)).await;
    match result {
        Ok(outcome) => {
            tracing::info!(name = %name, status = outcome.as_str(), "entry saved");
            Json(json!({ "name": name, "status": outcome.as_str() })).into_response()
        }
        Err(err) => error_response(err),
    }
}

fn validate_upsert(payload: UpsertRequest) -> Result<(String, Map<String, JsonValue>), Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage)
            .with_message("Invalid request format. \"name\" and \"data\" fields are required.")
    };
    let name = payload
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(invalid)?;
    match payload.data {
        Some(JsonValue::Object(data)) => Ok((name, data)),
        Some(_) => Err(invalid().with_hint("\"data\" must be a JSON object of field values.")),
        None => Err(invalid()),
    }
}

fn lua_response(entry: &Entry) -> Response {
    let mut response = format!("return {}", encode_entry_inline(entry)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn rejection_response(rejection: JsonRejection) -> Response {
    let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::BAD_REQUEST
    };
    let err = Error::new(ErrorKind::Usage)
        .with_message(format!("invalid request body: {}", rejection.body_text()))
        .with_hint("Send a JSON object like {\"name\": \"Pikachu\", \"data\": {\"hp\": 35}}.");
    error_response_with_status(err, status)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Read | ErrorKind::Parse | ErrorKind::Write | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    error_response_with_status(err, status)
}

fn error_response_with_status(err: Error, status: StatusCode) -> Response {
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            path: err.path().map(|path| path.to_string_lossy().to_string()),
            line: err.line(),
        },
    };
    (status, Json(body)).into_response()
}
