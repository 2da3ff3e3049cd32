//! Export job handlers: submit, status, download and per-job events.

use super::JobQuery;
use crate::api::AppState;
use crate::error::{Error, ValidationError};
use crate::options::ExportOptions;
use crate::types::{Event, JobId, ProposalId, StatusResponse};
use crate::utils::content_disposition;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt, stream};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

fn parse_proposal_id(raw: String) -> Result<ProposalId, Error> {
    Ok(ProposalId::new(raw)?)
}

fn parse_job_id(query: &JobQuery) -> Result<JobId, Error> {
    let raw = query
        .job_id
        .as_deref()
        .ok_or_else(|| ValidationError::new("jobId", "query parameter is required"))?;
    Ok(raw.parse::<JobId>()?)
}

/// POST /api/proposals/:proposal_id/export - Submit an export job
#[utoipa::path(
    post,
    path = "/api/proposals/{proposal_id}/export",
    tag = "export",
    params(
        ("proposal_id" = String, Path, description = "Proposal to export")
    ),
    request_body = ExportOptions,
    responses(
        (status = 202, description = "Job accepted", body = crate::types::SubmitResponse),
        (status = 400, description = "Invalid export options", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid API key", body = crate::error::ApiError),
        (status = 503, description = "Service is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_export(
    State(state): State<AppState>,
    Path(proposal_id): Path<String>,
    options: Result<Json<ExportOptions>, JsonRejection>,
) -> Result<Response, Error> {
    let proposal_id = parse_proposal_id(proposal_id)?;
    let Json(options) = options.map_err(|rejection| {
        Error::Validation(ValidationError::new("body", rejection.body_text()))
    })?;

    let submitted = state.service.create_job(proposal_id, options).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted)).into_response())
}

/// GET /api/proposals/:proposal_id/export/status - Poll job status
#[utoipa::path(
    get,
    path = "/api/proposals/{proposal_id}/export/status",
    tag = "export",
    params(
        ("proposal_id" = String, Path, description = "Proposal the job belongs to"),
        JobQuery
    ),
    responses(
        (status = 200, description = "Current job status", body = StatusResponse),
        (status = 400, description = "Missing or invalid jobId", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn export_status(
    State(state): State<AppState>,
    Path(proposal_id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Json<StatusResponse>, Error> {
    let proposal_id = parse_proposal_id(proposal_id)?;
    let job_id = parse_job_id(&query)?;

    let status = state.service.job_status(&proposal_id, &job_id).await?;
    Ok(Json(StatusResponse::from(status)))
}

/// GET /api/proposals/:proposal_id/export/download - Fetch the finished PDF
#[utoipa::path(
    get,
    path = "/api/proposals/{proposal_id}/export/download",
    tag = "export",
    params(
        ("proposal_id" = String, Path, description = "Proposal the job belongs to"),
        JobQuery
    ),
    responses(
        (status = 200, description = "Rendered PDF", content_type = "application/pdf"),
        (status = 400, description = "Missing or invalid jobId", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job has not completed", body = crate::error::ApiError)
    )
)]
pub async fn download_export(
    State(state): State<AppState>,
    Path(proposal_id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Response, Error> {
    let proposal_id = parse_proposal_id(proposal_id)?;
    let job_id = parse_job_id(&query)?;

    let artifact = state.service.artifact(&proposal_id, &job_id).await?;
    let bytes = tokio::fs::read(&artifact.path).await.map_err(|e| {
        tracing::error!(job_id = %job_id, path = %artifact.path.display(), error = %e, "Artifact missing for completed job");
        Error::Io(e)
    })?;

    tracing::debug!(job_id = %job_id, bytes = bytes.len(), "Serving export");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&artifact.download_name),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}

/// GET /api/proposals/:proposal_id/export/events - Server-sent events for one job
///
/// The first event is a `status` snapshot. Lifecycle events follow until the
/// job reaches a terminal state, at which point the stream ends.
#[utoipa::path(
    get,
    path = "/api/proposals/{proposal_id}/export/events",
    tag = "export",
    params(
        ("proposal_id" = String, Path, description = "Proposal the job belongs to"),
        JobQuery
    ),
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream"),
        (status = 400, description = "Missing or invalid jobId", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn export_events(
    State(state): State<AppState>,
    Path(proposal_id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, Error> {
    let proposal_id = parse_proposal_id(proposal_id)?;
    let job_id = parse_job_id(&query)?;

    // Subscribe before reading the snapshot so no transition falls in between
    let receiver = state.service.subscribe();
    let snapshot = state.service.job_status(&proposal_id, &job_id).await?;
    let snapshot_terminal = snapshot.is_terminal();
    let head = frame("status", &StatusResponse::from(snapshot));

    let service = state.service.clone();
    let updates = stream::unfold(
        (BroadcastStream::new(receiver), snapshot_terminal),
        move |(mut events, done)| {
            let service = service.clone();
            let proposal_id = proposal_id.clone();
            let job_id = job_id.clone();
            async move {
                if done {
                    return None;
                }
                while let Some(received) = events.next().await {
                    match received {
                        Ok(event)
                            if event.job_id() == Some(&job_id)
                                || matches!(event, Event::Shutdown) =>
                        {
                            let terminal = event.is_terminal();
                            return Some((frame(event.name(), &event), (events, terminal)));
                        }
                        Ok(_) => {}
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            tracing::warn!(job_id = %job_id, skipped, "SSE client lagged, resending snapshot");
                            // The terminal event may be among the skipped ones
                            return match service.job_status(&proposal_id, &job_id).await {
                                Ok(status) => {
                                    let terminal = status.is_terminal();
                                    Some((
                                        frame("status", &StatusResponse::from(status)),
                                        (events, terminal),
                                    ))
                                }
                                Err(e) => Some((
                                    frame("error", &crate::error::ApiError::from(e)),
                                    (events, true),
                                )),
                            };
                        }
                    }
                }
                None
            }
        },
    );

    let stream = stream::once(async move { head })
        .chain(updates)
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn frame<T: serde::Serialize>(name: &str, payload: &T) -> SseEvent {
    match SseEvent::default().event(name).json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event to JSON");
            SseEvent::default()
                .event("error")
                .data(r#"{"error":"serialization failed"}"#)
        }
    }
}
