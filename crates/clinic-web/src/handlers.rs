//! HTTP处理器
//!
//! 每个处理器只做三件事：取出操作者、反序列化请求、调用工作流引擎。
//! 业务裁决（角色、租约、状态机）全部发生在引擎与存储层，
//! 这里仅负责错误到状态码的映射。

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use clinic_core::{
    Actor, ClinicError, DiagnosisInput, EncounterStatus, EncounterStore, LabOrderInput,
    NewEncounter, NewPatient, PrescriptionInput, TriageInput,
};
use clinic_workflow::{QueueKind, WorkflowEngine};

use crate::auth::WorkerRegistry;

/// 共享应用状态
pub struct AppState<S: EncounterStore> {
    pub engine: Arc<WorkflowEngine<S>>,
    pub workers: WorkerRegistry,
}

impl<S: EncounterStore> AppState<S> {
    pub fn new(engine: Arc<WorkflowEngine<S>>, workers: WorkerRegistry) -> Self {
        Self { engine, workers }
    }
}

impl<S: EncounterStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            workers: self.workers.clone(),
        }
    }
}

/// HTTP 边界上的错误包装
///
/// 处理器经 `?` 将 `ClinicError` 提升为响应；
/// 错误码是对外契约的一部分，客户端按 `code` 分支而非解析消息文本。
pub struct ApiError(pub ClinicError);

impl From<ClinicError> for ApiError {
    fn from(err: ClinicError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self.0 {
            ClinicError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ClinicError::AlreadyClaimed(msg) => (
                StatusCode::CONFLICT,
                "ALREADY_CLAIMED",
                format!("already being handled by another worker: {}", msg),
            ),
            ClinicError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ClinicError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION", msg),
            ClinicError::DuplicateEncounter(msg) => {
                (StatusCode::CONFLICT, "DUPLICATE_ENCOUNTER", msg)
            }
            ClinicError::DuplicateCode(code) => (
                StatusCode::CONFLICT,
                "DUPLICATE_CODE",
                format!("duplicate diagnosis code: {}", code),
            ),
            ClinicError::InvalidStateTransition { from, event } => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("invalid transition from {} on {}", from, event),
            ),
            ClinicError::Config(msg)
            | ClinicError::Database(msg)
            | ClinicError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg),
            ClinicError::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                e.to_string(),
            ),
            ClinicError::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                e.to_string(),
            ),
        };

        let body = Json(json!({
            "error": true,
            "code": code,
            "message": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "Clinic Workflow API",
        "version": "1.0.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "1.0.0"
    }))
}

// ========== 请求参数 ==========

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    /// 缺省取当日（UTC 日历日）
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteConsultRequest {
    pub next_status: EncounterStatus,
}

// ========== 患者与就诊登记 ==========

pub async fn register_patient<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewPatient>,
) -> ApiResult<impl IntoResponse> {
    let patient = state.engine.register_patient(new, &actor).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn get_patient<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let patient = state.engine.patient(id).await?;
    Ok(Json(patient))
}

pub async fn create_encounter<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewEncounter>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.create_encounter(new, &actor).await?;
    Ok((StatusCode::CREATED, Json(encounter)))
}

pub async fn get_encounter<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.encounter(id, &actor).await?;
    Ok(Json(encounter))
}

pub async fn get_triage_record<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let record = state.engine.triage_record(id, &actor).await?;
    Ok(Json(record))
}

// ========== 队列 ==========

pub async fn get_queue<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(kind): Path<QueueKind>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<impl IntoResponse> {
    let date = query
        .date
        .unwrap_or_else(|| chrono::Utc::now().date_naive());
    let items = state.engine.visible_queue(kind, &actor, Some(date)).await?;
    let total = items.len();
    Ok(Json(json!({
        "kind": kind,
        "date": date,
        "items": items,
        "total": total
    })))
}

// ========== 分诊操作 ==========

pub async fn claim_triage<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.claim_triage(id, &actor).await?;
    Ok(Json(encounter))
}

pub async fn release_triage<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.release_triage(id, &actor).await?;
    Ok(Json(encounter))
}

pub async fn submit_triage<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(input): Json<TriageInput>,
) -> ApiResult<impl IntoResponse> {
    let record = state.engine.submit_triage(id, input, &actor).await?;
    Ok(Json(record))
}

// ========== 医生操作 ==========

pub async fn claim_doctor<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.claim_doctor_queue_item(id, &actor).await?;
    Ok(Json(encounter))
}

pub async fn start_consult<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.start_consultation(id, &actor).await?;
    Ok(Json(encounter))
}

pub async fn complete_consult<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteConsultRequest>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state
        .engine
        .complete_consultation(id, request.next_status, &actor)
        .await?;
    Ok(Json(encounter))
}

pub async fn cancel_encounter<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let encounter = state.engine.cancel_encounter(id, &actor).await?;
    Ok(Json(encounter))
}

// ========== 临床内容 ==========

pub async fn add_diagnosis<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(input): Json<DiagnosisInput>,
) -> ApiResult<impl IntoResponse> {
    let diagnosis = state.engine.add_diagnosis(id, input, &actor).await?;
    Ok((StatusCode::CREATED, Json(diagnosis)))
}

pub async fn remove_diagnosis<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let diagnosis = state.engine.remove_diagnosis(id, &actor).await?;
    Ok(Json(diagnosis))
}

pub async fn add_prescription<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(input): Json<PrescriptionInput>,
) -> ApiResult<impl IntoResponse> {
    let prescription = state.engine.add_prescription(id, input, &actor).await?;
    Ok((StatusCode::CREATED, Json(prescription)))
}

pub async fn add_lab_order<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(input): Json<LabOrderInput>,
) -> ApiResult<impl IntoResponse> {
    let order = state.engine.add_lab_order(id, input, &actor).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

// ========== 审计 ==========

pub async fn get_audit_trail<S: EncounterStore>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let entries = state.engine.encounter_audit(id, &actor).await?;
    let total = entries.len();
    Ok(Json(json!({
        "encounter_id": id,
        "entries": entries,
        "total": total
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 错误到状态码的映射是对外契约，逐类断言
    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ClinicError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (
                ClinicError::AlreadyClaimed("x".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                ClinicError::Forbidden("x".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (
                ClinicError::Validation("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ClinicError::DuplicateEncounter("x".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                ClinicError::DuplicateCode("J00".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                ClinicError::InvalidStateTransition {
                    from: "Done".to_string(),
                    event: "Cancel".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                ClinicError::Database("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
