use crate::errors::Error;
use crate::celestial::Horizontal;
use crate::model::{SightingUpload, StationHealth};
use crate::series::{Interval, Series, SeriesField};
use crate::service::AmosService;
use crate::status::DecodedStatus;
use crate::validate::parse_timestamp;
use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

#[derive(Clone)]
struct AppState {
    service: AmosService,
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    /// Comma-separated field names
    fields: Option<String>,
    start: Option<String>,
    end: Option<String>,
    /// Seconds, or `all`
    interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SunQuery {
    at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecodeQuery {
    s: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Created {
    id: i64,
}

pub fn create_router(service: AmosService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/api/v1/stations/:station/heartbeats", post(post_heartbeat))
        .route("/api/v1/stations/:station/sightings", post(post_sighting))
        .route("/api/v1/stations/:station/health", get(get_health))
        .route("/api/v1/stations/:station/series", get(get_series))
        .route("/api/v1/stations/:station/sun", get(get_sun_position))
        .route("/api/v1/status/decode", get(get_decoded_status))
        .with_state(state)
}

async fn post_heartbeat(
    State(state): State<AppState>,
    Path(station_code): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let id = state.service.ingest_heartbeat(&station_code, &body).await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn post_sighting(
    State(state): State<AppState>,
    Path(station_code): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let mut upload = SightingUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::malformed("multipart", e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::malformed(name.as_str(), e.to_string()))?;

        match name.as_str() {
            "meta" => {
                let meta = String::from_utf8(data.to_vec())
                    .map_err(|_| Error::malformed("meta", "not valid UTF-8"))?;
                upload.meta = Some(meta);
            }
            "jpg" => upload.jpg = Some(data.to_vec()),
            "xml" => upload.xml = Some(data.to_vec()),
            other => warn!("Ignoring unexpected form field {:?}", other),
        }
    }

    let id = state.service.ingest_sighting(&station_code, upload).await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn get_health(
    State(state): State<AppState>,
    Path(station_code): Path<String>,
) -> Result<Json<StationHealth>, AppError> {
    let station_id = state.service.station_id(&station_code).await?;
    Ok(Json(state.service.classify_health(station_id).await?))
}

async fn get_sun_position(
    State(state): State<AppState>,
    Path(station_code): Path<String>,
    Query(params): Query<SunQuery>,
) -> Result<Json<Option<Horizontal>>, AppError> {
    let station_id = state.service.station_id(&station_code).await?;
    let at = optional_timestamp(params.at.as_deref())?;
    Ok(Json(state.service.station_sun_position(station_id, at).await?))
}

async fn get_series(
    State(state): State<AppState>,
    Path(station_code): Path<String>,
    Query(params): Query<SeriesQuery>,
) -> Result<Json<Series>, AppError> {
    let station_id = state.service.station_id(&station_code).await?;
    let fields = match &params.fields {
        Some(raw) => raw
            .split(',')
            .filter(|name| !name.trim().is_empty())
            .map(|name| name.parse::<SeriesField>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::malformed("fields", e))?,
        None => Vec::new(),
    };
    let start = optional_timestamp(params.start.as_deref())?;
    let end = optional_timestamp(params.end.as_deref())?;
    let interval = params
        .interval
        .as_deref()
        .map(str::parse::<Interval>)
        .transpose()
        .map_err(|e| Error::malformed("interval", e))?;

    let series = state
        .service
        .aggregate_series(station_id, &fields, start, end, interval)
        .await?;
    Ok(Json(series))
}

async fn get_decoded_status(
    State(state): State<AppState>,
    Query(params): Query<DecodeQuery>,
) -> Json<DecodedStatus> {
    Json(state.service.decode_status(params.s.as_deref()))
}

fn optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, Error> {
    raw.map(parse_timestamp).transpose()
}

struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0 {
            Error::UnknownStation(_) => StatusCode::NOT_FOUND,
            Error::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            Error::MalformedTimestamp(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
