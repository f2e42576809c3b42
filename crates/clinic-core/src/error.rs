//! 错误定义模块

use thiserror::Error;

/// 门诊系统统一错误类型
///
/// 业务规则失败一律以类型化结果返回给调用方，不作为意外异常抛出；
/// 仅基础设施故障（数据库连接、序列化等）作为 `Database`/`Internal` 中止事务。
#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    /// 实体不存在，或不处于该操作期望的状态。
    ///
    /// 该错误码合并了"不存在"、"状态不符"、"机构不符"等多种原因，
    /// 调用方不得据此反推具体原因。
    #[error("资源未找到或状态已变更: {0}")]
    NotFound(String),

    /// 目标就诊已被另一名工作人员持有有效租约。
    #[error("已由其他工作人员处理中: {0}")]
    AlreadyClaimed(String),

    #[error("无权执行该操作: {0}")]
    Forbidden(String),

    #[error("验证错误: {0}")]
    Validation(String),

    /// 同一患者当日在同一机构已存在有效就诊记录。
    #[error("重复就诊记录: {0}")]
    DuplicateEncounter(String),

    /// 同一就诊内诊断编码重复。
    #[error("重复诊断编码: {0}")]
    DuplicateCode(String),

    #[error("无效状态转换: 从 {from} 执行 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 门诊系统统一结果类型
pub type Result<T> = std::result::Result<T, ClinicError>;
