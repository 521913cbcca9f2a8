use crate::api_error::ApiJson;
use crate::{ApiError, Caller, HubState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use leadflow_core::{Account, Lead, RowPayload};
use leadflow_engine::{
    read_csv_rows, AgentLoad, ArchiveEntry, BatchView, ExportFile, NewAgent, ReassignRequest,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub(crate) fn api_routes() -> Router<HubState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/auth/check", get(auth_check))
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/with-leads", get(users_with_leads))
        .route("/api/users/:id", delete(delete_user))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files", get(my_files))
        .route("/api/files/all", get(all_files))
        .route("/api/files/download/:id", get(download_file))
        .route("/api/files/:id/repair-roster", post(repair_roster))
        .route("/api/leads", get(my_leads))
        .route("/api/leads/:id/status", patch(update_status))
        .route("/api/reassign", post(reassign))
        .route("/api/archive/forward-to-admin", post(forward_to_admin))
        .route("/api/archive/admin/all-forwarded", get(all_forwarded))
        .route("/api/archive/admin/download-all", get(download_all))
        .route("/api/archive/admin/purge-all", delete(purge_all))
}

#[derive(Debug, Deserialize)]
struct NewUserBody {
    email: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadQuery {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadBody {
    name: Option<String>,
    rows: Vec<RowPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct LeadsQuery {
    batch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReassignBody {
    file_id: Option<String>,
    old_user_id: Option<String>,
    new_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardBody {
    #[serde(default)]
    lead_ids: Vec<String>,
}

async fn auth_check(Caller(ctx): Caller) -> Json<Value> {
    Json(json!({ "authenticated": true, "user": ctx }))
}

async fn create_user(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    ApiJson(body): ApiJson<NewUserBody>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let request = NewAgent {
        email: body.email,
        username: body.username,
    };
    let account = state
        .run(move |engine| engine.create_agent(&ctx, &request))
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_users(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Json<Vec<Account>>, ApiError> {
    Ok(Json(state.run(move |engine| engine.accounts(&ctx)).await?))
}

async fn users_with_leads(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Json<Vec<AgentLoad>>, ApiError> {
    Ok(Json(state.run(move |engine| engine.agent_loads(&ctx)).await?))
}

async fn delete_user(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .run(move |engine| engine.delete_account(&ctx, &id))
        .await?;
    Ok(Json(json!({ "message": "user deleted" })))
}

/// Accepts either a JSON `{ name, rows }` body or a raw CSV sheet named by
/// the `name` query parameter.
async fn upload_file(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (name, rows) = if is_csv(&headers) {
        (query.name.unwrap_or_default(), read_csv_rows(&body)?)
    } else {
        let upload: UploadBody = serde_json::from_slice(&body)
            .map_err(|err| ApiError::bad_request(format!("invalid upload body: {err}")))?;
        (upload.name.or(query.name).unwrap_or_default(), upload.rows)
    };

    let report = state
        .run(move |engine| engine.distribute(&ctx, &name, rows))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "file uploaded and distributed",
            "batchId": report.batch.id,
            "batch": report.batch,
            "totalRecords": report.total_records,
        })),
    ))
}

async fn my_files(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Json<Vec<BatchView>>, ApiError> {
    Ok(Json(
        state
            .run(move |engine| engine.batches_for_agent(&ctx))
            .await?,
    ))
}

async fn all_files(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Json<Vec<BatchView>>, ApiError> {
    Ok(Json(state.run(move |engine| engine.all_batches(&ctx)).await?))
}

async fn download_file(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let file = state
        .run(move |engine| engine.export_agent_batch(&ctx, &id))
        .await?;
    Ok(attachment(file))
}

async fn repair_roster(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let batch = state
        .run(move |engine| engine.repair_roster(&ctx, &id))
        .await?;
    Ok(Json(json!({ "message": "roster repaired", "batch": batch })))
}

async fn my_leads(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<Vec<Lead>>, ApiError> {
    let leads = state
        .run(move |engine| engine.leads_for_agent(&ctx, query.batch.as_deref()))
        .await?;
    Ok(Json(leads))
}

async fn update_status(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<StatusBody>,
) -> Result<Json<Lead>, ApiError> {
    let requested = body.status.unwrap_or_default();
    let lead = state
        .run(move |engine| engine.set_status(&ctx, &id, &requested))
        .await?;
    Ok(Json(lead))
}

async fn reassign(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    ApiJson(body): ApiJson<ReassignBody>,
) -> Result<Json<Value>, ApiError> {
    let request = ReassignRequest {
        batch_id: body.file_id,
        from_agent: body.old_user_id,
        to_agent: body.new_user_id,
    };
    let report = state
        .run(move |engine| engine.reassign(&ctx, &request))
        .await?;
    Ok(Json(json!({
        "message": format!("successfully reassigned {} leads", report.moved),
        "movedCount": report.moved,
        "sourceReleased": report.source_released,
    })))
}

async fn forward_to_admin(
    State(state): State<HubState>,
    Caller(ctx): Caller,
    ApiJson(body): ApiJson<ForwardBody>,
) -> Result<Json<Value>, ApiError> {
    let report = state
        .run(move |engine| engine.forward(&ctx, &body.lead_ids))
        .await?;
    Ok(Json(json!({
        "message": "leads forwarded to admin",
        "archivedCount": report.archived,
        "clearedCount": report.cleared,
    })))
}

async fn all_forwarded(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Json<Vec<ArchiveEntry>>, ApiError> {
    Ok(Json(
        state
            .run(move |engine| engine.archive_entries(&ctx))
            .await?,
    ))
}

async fn download_all(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Response, ApiError> {
    let file = state.run(move |engine| engine.export_all(&ctx)).await?;
    Ok(attachment(file))
}

async fn purge_all(
    State(state): State<HubState>,
    Caller(ctx): Caller,
) -> Result<Json<Value>, ApiError> {
    let report = state.run(move |engine| engine.purge_all(&ctx)).await?;
    Ok(Json(json!({
        "ok": true,
        "message": "archive purged",
        "removed": report.removed,
    })))
}

fn is_csv(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().starts_with("text/csv"))
        .unwrap_or(false)
}

fn attachment(file: ExportFile) -> Response {
    let filename = file.filename.replace(['"', '\\'], "_");
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        file.bytes,
    )
        .into_response()
}
