//! 工作人员认证
//!
//! 门诊工作站按预发放的 API Key 标识操作者，不设登录会话：
//! 每个请求独立携带身份，中间件解析后注入请求扩展，
//! 处理器从扩展中取出操作者传给工作流引擎。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use clinic_core::{Actor, ActorRole, ClinicError};

use crate::handlers::ApiError;

/// 携带 API Key 的请求头
pub const API_KEY_HEADER: &str = "x-api-key";

/// 工作人员注册表：API Key → 操作者身份
#[derive(Clone)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<HashMap<String, Actor>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 登记一名工作人员
    pub async fn register(&self, api_key: impl Into<String>, actor: Actor) -> Actor {
        let mut workers = self.workers.write().await;
        workers.insert(api_key.into(), actor.clone());
        actor
    }

    /// 按 API Key 解析操作者
    pub async fn resolve(&self, api_key: &str) -> Option<Actor> {
        self.workers.read().await.get(api_key).cloned()
    }

    /// 所有已登记的工作人员
    pub async fn workers(&self) -> Vec<Actor> {
        self.workers.read().await.values().cloned().collect()
    }

    /// 预置默认工作人员，每个角色一个固定 Key
    ///
    /// 注意：实际部署应从配置或人事系统下发 Key，
    /// 这里的固定 Key 仅用于开箱即用的演示环境。
    pub async fn seed_defaults(&self, facility_id: Uuid) {
        let defaults = vec![
            (
                "clinic-admin-key",
                Actor::new("系统管理员", ActorRole::Admin, facility_id),
            ),
            (
                "clinic-reg-key",
                Actor::new("挂号员小李", ActorRole::Registration, facility_id),
            ),
            (
                "clinic-nurse-1-key",
                Actor::new("护士小王", ActorRole::Nurse, facility_id),
            ),
            (
                "clinic-nurse-2-key",
                Actor::new("护士小张", ActorRole::Nurse, facility_id),
            ),
            (
                "clinic-doctor-1-key",
                Actor::new("张医生", ActorRole::Doctor, facility_id),
            ),
            (
                "clinic-doctor-2-key",
                Actor::new("刘医生", ActorRole::Doctor, facility_id),
            ),
        ];

        let mut workers = self.workers.write().await;
        for (key, actor) in defaults {
            workers.insert(key.to_string(), actor);
        }
        info!("Seeded default workers for facility {}", facility_id);
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 认证中间件
///
/// 解析 X-Api-Key 请求头，将对应的操作者注入请求扩展；
/// 缺失或未登记的 Key 直接拒绝。
pub async fn auth_middleware(
    State(registry): State<WorkerRegistry>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    let key = match api_key {
        Some(key) if !key.is_empty() => key,
        _ => {
            return Err(ClinicError::Forbidden("missing X-Api-Key header".to_string()).into());
        }
    };

    match registry.resolve(key).await {
        Some(actor) => {
            request.extensions_mut().insert(actor);
            Ok(next.run(request).await)
        }
        None => Err(ClinicError::Forbidden("unknown api key".to_string()).into()),
    }
}

/// 当前操作者信息
pub async fn current_worker(Extension(actor): Extension<Actor>) -> Json<Actor> {
    Json(actor)
}

/// 所有工作人员（仅管理员）
pub async fn list_workers(
    State(registry): State<WorkerRegistry>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Actor>>, ApiError> {
    if actor.role != ActorRole::Admin {
        return Err(ClinicError::Forbidden("admin access required".to_string()).into());
    }
    Ok(Json(registry.workers().await))
}
