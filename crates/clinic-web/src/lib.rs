//! HTTP 接口层
//!
//! 基于 axum 的 REST 服务：API Key 认证中间件解析操作者身份，
//! 处理器将请求翻译为工作流引擎调用，错误按统一契约映射为状态码。

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::WorkerRegistry;
pub use handlers::{ApiError, AppState};
pub use server::WebServer;
