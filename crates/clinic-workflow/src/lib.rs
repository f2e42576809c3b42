//! # 门诊工作流模块
//!
//! 提供完整的门诊就诊流程协调功能，包括：
//! - 就诊状态机：管理就诊记录的完整生命周期
//! - 租约管理：分诊队列的抢占协调与过期回收
//! - 队列策略：按角色和租约状态计算队列可操作性
//! - 工作流门面：对外暴露的统一业务入口

pub mod engine;
pub mod lease;
pub mod memory;
pub mod queue;
pub mod state_machine;

// 重新导出主要类型
pub use engine::WorkflowEngine;
pub use lease::{LeaseDecision, LeaseManager, ReleaseDecision, DEFAULT_LEASE_TTL_MINUTES};
pub use memory::MemoryEncounterStore;
pub use queue::{QueueItem, QueueItemState, QueueKind, QueuePolicy};
pub use state_machine::{EncounterEvent, EncounterStateMachine};
