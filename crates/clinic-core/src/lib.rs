//! # Clinic Core
//!
//! 门诊工作流系统的核心模块，提供基础数据结构、错误定义、存储契约和通用工具。

pub mod audit;
pub mod error;
pub mod models;
pub mod store;
pub mod utils;

pub use audit::{AuditAction, AuditLogEntry, EntityType, NewAuditEntry};
pub use error::{ClinicError, Result};
pub use models::*;
pub use store::EncounterStore;
