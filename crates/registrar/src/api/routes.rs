//! HTTP adapter (spec.md §6): request/response shaping only. Every handler
//! here is a thin wrapper around a domain orchestrator call — parsing
//! belongs here, business logic does not (spec.md §9: "place multipart vs
//! JSON parsing strictly at the HTTP adapter").

use crate::domain::Error;
use crate::startup::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use registrar_core::{
    CheckInResponse, ManualCheckInRequest, RegistrationRequest, ScanRequest, Stats, TeamView,
    VerifyOtpRequest,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct RegisterResponseBody {
    status: &'static str,
    message: &'static str,
    expires_in_sec: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<String>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegistrationRequest>,
) -> Result<Json<RegisterResponseBody>, Error> {
    let outcome = state.registration.register(request).await?;
    Ok(Json(RegisterResponseBody {
        status: "ok",
        message: outcome.message,
        expires_in_sec: outcome.expires_in_sec,
        otp: outcome.dev_otp,
    }))
}

#[derive(Debug, Serialize)]
struct VerifyResponseBody {
    #[serde(flatten)]
    team: TeamView,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<(StatusCode, Json<VerifyResponseBody>), Error> {
    let outcome = state
        .registration
        .verify_otp(&request.leader_email, &request.otp)
        .await?;

    // spec.md §4.7 step 5: a post-commit artifact failure is reported
    // alongside the commit, never as a failure of it.
    let status = if outcome.artifact_warning.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(VerifyResponseBody {
            team: outcome.team,
            warning: outcome.artifact_warning,
        }),
    ))
}

pub async fn get_team_by_code(
    State(state): State<Arc<AppState>>,
    Path(team_code): Path<String>,
) -> Result<Json<TeamView>, Error> {
    state
        .credential_store
        .find_by_team_code(&team_code)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("no team with team_code {team_code}")))
}

pub async fn get_team_by_id(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
) -> Result<Json<TeamView>, Error> {
    state
        .credential_store
        .find_by_team_id(&team_id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("no team with team_id {team_id}")))
}

pub async fn checkin_manual(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ManualCheckInRequest>,
) -> Result<Json<CheckInResponse>, Error> {
    Ok(Json(state.checkin.manual_checkin(&request.team_id).await?))
}

pub async fn checkin_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<CheckInResponse>, Error> {
    Ok(Json(state.checkin.scan(&request.payload).await?))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    team_id: String,
    key: String,
}

/// `GET /download/id-cards` (spec.md §6): re-renders the card document for
/// an already-committed team on demand — the mailed copy's temp file was
/// deleted right after sending (spec.md §5), so this is a fresh render, not
/// a cached artifact lookup.
pub async fn download_id_cards(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, Error> {
    let view = state
        .credential_store
        .find_by_team_id(&query.team_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no team with team_id {}", query.team_id)))?;

    if view.team.access_key != query.key {
        return Err(Error::Unauthorized("access key does not match".into()));
    }

    let path = state.registration.render_document(&view).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| Error::Internal(format!("failed to read rendered document: {e}")));
    let _ = tokio::fs::remove_file(&path).await;
    let bytes = bytes?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}-id-cards.pdf\"",
                view.team.team_id
            ),
        )
        .body(Body::from(bytes))
        .map_err(|e| Error::Internal(e.to_string()))
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, Error> {
    Ok(Json(Stats {
        registered_teams: state.credential_store.registered_team_count().await?,
        checked_in_teams: state.credential_store.checked_in_team_count().await?,
        pending_registrations: state.pending_store.count().await,
        otps_outstanding: state.otp_store.outstanding_count().await,
    }))
}

#[derive(Debug, Serialize)]
pub struct ResendArtifactsResponse {
    status: &'static str,
}

/// `POST /admin/teams/{team_id}/resend-artifacts` (SPEC_FULL.md §F): lets an
/// operator retry the card/PDF/email pipeline for a team whose
/// `artifact_status` recorded a failure (spec.md §4.7 step 5). Unauthenticated
/// — reachable only from behind a reverse proxy that an operator controls,
/// same as the rest of the admin surface this spec leaves out of scope.
pub async fn resend_artifacts(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<String>,
) -> Result<Json<ResendArtifactsResponse>, Error> {
    state.registration.retry_artifacts(&team_id).await?;
    Ok(Json(ResendArtifactsResponse { status: "ok" }))
}

fn check_in_event_stream(
    rx: broadcast::Receiver<registrar_core::CheckInEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(data)), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// `GET /stats/stream` (SPEC_FULL.md §F): server-sent events for any
/// attached live-dashboard consumer of spec.md §4.8 step 3's pub-sub bus.
pub async fn stats_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    Sse::new(check_in_event_stream(rx)).keep_alive(KeepAlive::default())
}
