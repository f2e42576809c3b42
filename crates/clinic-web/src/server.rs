//! Web服务器
//!
//! 路由按认证边界分三层：根路径与健康检查公开，
//! `/auth` 与 `/api/v1` 全部经过 API Key 中间件。

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use clinic_core::{ClinicError, EncounterStore, Result};
use clinic_workflow::WorkflowEngine;

use crate::auth::{auth_middleware, current_worker, list_workers, WorkerRegistry};
use crate::handlers::{
    add_diagnosis, add_lab_order, add_prescription, api_root, cancel_encounter, claim_doctor,
    claim_triage, complete_consult, create_encounter, get_audit_trail, get_encounter, get_patient,
    get_queue, get_triage_record, health, register_patient, release_triage, remove_diagnosis,
    start_consult, submit_triage, AppState,
};

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new<S: EncounterStore + 'static>(
        addr: SocketAddr,
        engine: Arc<WorkflowEngine<S>>,
        workers: WorkerRegistry,
    ) -> Self {
        let app = create_app(engine, workers);
        Self { addr, app }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| ClinicError::Internal(format!("web server error: {}", e)))?;

        Ok(())
    }
}

pub fn create_app<S: EncounterStore + 'static>(
    engine: Arc<WorkflowEngine<S>>,
    workers: WorkerRegistry,
) -> Router {
    let state = AppState::new(engine, workers.clone());

    // 业务路由
    let api = api_routes::<S>()
        .layer(axum::middleware::from_fn_with_state(
            workers.clone(),
            auth_middleware,
        ))
        .with_state(state);

    // 身份路由
    let auth = Router::new()
        .route("/me", get(current_worker))
        .route("/workers", get(list_workers))
        .layer(axum::middleware::from_fn_with_state(
            workers.clone(),
            auth_middleware,
        ))
        .with_state(workers);

    Router::new()
        // 根路径
        .route("/", get(api_root))
        // 健康检查
        .route("/health", get(health))
        // API路由
        .nest("/api/v1", api)
        .nest("/auth", auth)
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

/// API v1 路由
fn api_routes<S: EncounterStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        .route("/patients", post(register_patient::<S>))
        .route("/patients/:id", get(get_patient::<S>))
        .route("/encounters", post(create_encounter::<S>))
        .route("/encounters/:id", get(get_encounter::<S>))
        .route(
            "/encounters/:id/triage",
            get(get_triage_record::<S>).post(submit_triage::<S>),
        )
        .route("/encounters/:id/claim", post(claim_triage::<S>))
        .route("/encounters/:id/release", post(release_triage::<S>))
        .route("/encounters/:id/doctor-claim", post(claim_doctor::<S>))
        .route("/encounters/:id/consult/start", post(start_consult::<S>))
        .route(
            "/encounters/:id/consult/complete",
            post(complete_consult::<S>),
        )
        .route("/encounters/:id/cancel", post(cancel_encounter::<S>))
        .route("/encounters/:id/diagnoses", post(add_diagnosis::<S>))
        .route("/diagnoses/:id", delete(remove_diagnosis::<S>))
        .route("/encounters/:id/prescriptions", post(add_prescription::<S>))
        .route("/encounters/:id/lab-orders", post(add_lab_order::<S>))
        .route("/encounters/:id/audit", get(get_audit_trail::<S>))
        .route("/queues/:kind", get(get_queue::<S>))
}
