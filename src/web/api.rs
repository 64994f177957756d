use crate::event::EventSink;
use crate::model::{Job, JobStatus, PrinterStatus};
use crate::registry::PrinterRegistry;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PrinterRegistry>,
    pub event_sink: Arc<dyn EventSink>,
    pub store: Arc<dyn crate::store::JobStore>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/printers", get(list_printers))
        .route("/api/v1/printers/auto-queue-target", get(auto_queue_target))
        .route("/api/v1/printers/{id}/jobs", post(enqueue_job))
        .route("/api/v1/printers/{id}/release/{job_id}", post(release_job))
        .route("/api/v1/printers/{id}/cancel/{job_id}", post(cancel_job))
        .route("/api/v1/printers/{id}/status", post(set_status))
        .route("/api/v1/printers/{id}/reset", post(reset_printer))
        .with_state(state)
}

async fn list_printers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshot().await)
}

async fn auto_queue_target(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.smallest_queue().await {
        Some(id) => Json(serde_json::json!({ "printer_id": id })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "no printers registered" }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    file_name: String,
    /// Raw (already gzip-compressed) file bytes, base64-encoded by the caller's upload layer.
    file_b64: String,
    filament: String,
    td_id: Option<String>,
    favorite: Option<bool>,
    priority: Option<bool>,
}

async fn enqueue_job(
    State(state): State<AppState>,
    Path(printer_id): Path<i64>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let Some((_, queue)) = state.registry.find_by_id(printer_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "printer not found" }))).into_response();
    };

    let Ok(file) = base64_decode(&req.file_b64) else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "invalid base64 payload" }))).into_response();
    };

    let id = state.store.next_job_id().await;
    let mut job = Job::new(id, file, req.file_name.clone(), req.filament.clone(), req.td_id.clone(), req.favorite.unwrap_or(false), state.event_sink.clone());
    job.printer_id = Some(printer_id);
    state
        .store
        .insert_job(crate::store::JobRecord {
            id,
            printer_id: Some(printer_id),
            file_name_original: req.file_name,
            status: JobStatus::InQueue.as_str().to_string(),
            progress: 0.0,
            favorite: req.favorite.unwrap_or(false),
            comments: String::new(),
            error_id: None,
            td_id: req.td_id,
            filament: req.filament,
            created_at: chrono::Utc::now(),
        })
        .await;

    let job = Arc::new(tokio::sync::Mutex::new(job));
    let mut q = queue.lock().await;
    if req.priority.unwrap_or(false) {
        q.add_to_front(job).await;
    } else {
        q.add_to_back(job).await;
    }

    (StatusCode::CREATED, Json(serde_json::json!({ "job_id": id }))).into_response()
}

async fn release_job(
    State(state): State<AppState>,
    Path((printer_id, job_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let Some((_, queue)) = state.registry.find_by_id(printer_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "printer not found" }))).into_response();
    };
    let Some(job) = queue.lock().await.get_job_by_id(job_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "job not found" }))).into_response();
    };
    job.lock().await.set_released(1).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn cancel_job(
    State(state): State<AppState>,
    Path((printer_id, job_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let Some((printer, queue)) = state.registry.find_by_id(printer_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "printer not found" }))).into_response();
    };
    let is_active = printer.read().await.status == PrinterStatus::Printing
        && queue.lock().await.get_next().map(|j| j.clone()).is_some();
    if is_active {
        // Currently printing: signal cancellation through the streamer's checkpoint.
        printer.write().await.set_status(PrinterStatus::Complete).await;
    } else {
        queue.lock().await.delete_job(job_id).await;
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: String,
}

async fn set_status(
    State(state): State<AppState>,
    Path(printer_id): Path<i64>,
    Json(req): Json<SetStatusRequest>,
) -> impl IntoResponse {
    let Some((printer, _)) = state.registry.find_by_id(printer_id).await else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "printer not found" }))).into_response();
    };
    let status = match req.status.as_str() {
        "paused" => PrinterStatus::Paused,
        "colorchange" => PrinterStatus::ColorChange,
        "printing" => PrinterStatus::Printing,
        "ready" => PrinterStatus::Ready,
        "complete" => PrinterStatus::Complete,
        other => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": format!("unknown status {other}") }))).into_response(),
    };
    let leaving_error = printer.write().await.set_status(status).await;
    if leaving_error {
        state.registry.reset(printer_id, true).await;
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn reset_printer(State(state): State<AppState>, Path(printer_id): Path<i64>) -> impl IntoResponse {
    state.registry.reset(printer_id, false).await;
    StatusCode::NO_CONTENT.into_response()
}

fn base64_decode(s: &str) -> Result<Vec<u8>, ()> {
    // Minimal standard-alphabet decoder; avoids pulling in a dedicated
    // base64 crate for what upload middleware normally handles upstream.
    let table = |c: u8| -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    };
    let clean: Vec<u8> = s.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4);
    for chunk in clean.chunks(4) {
        let n = chunk.len();
        if n < 2 {
            return Err(());
        }
        let vals: Vec<u8> = chunk.iter().map(|&b| table(b)).collect::<Option<Vec<u8>>>().ok_or(())?;
        let mut acc: u32 = 0;
        for (i, v) in vals.iter().enumerate() {
            acc |= (*v as u32) << (18 - 6 * i);
        }
        let bytes = acc.to_be_bytes();
        out.extend_from_slice(&bytes[1..n]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decode_round_trips_ascii() {
        // "hi" -> "aGk="
        assert_eq!(base64_decode("aGk=").unwrap(), b"hi");
    }
}
