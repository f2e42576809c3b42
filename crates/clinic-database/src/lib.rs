//! # 门诊数据库模块
//!
//! 负责就诊流程数据的持久化，提供 PostgreSQL 连接池、建表语句
//! 与基于条件更新的 `EncounterStore` 实现。

pub mod connection;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use models::*;
pub use queries::DatabaseQueries;
pub use store::PgEncounterStore;
