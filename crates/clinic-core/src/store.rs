//! 就诊存储契约
//!
//! 工作流门面对存储的全部要求。每个变更方法是一个原子工作单元：
//! 前置条件检查、状态写入与审计追加要么全部生效、要么全部失败，
//! 不存在可观察的中间状态。"检查后写入"必须以条件更新表达
//! （谓词随写入一起提交），不得拆成独立的读和无条件写。

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::audit::{AuditLogEntry, EntityType};
use crate::error::Result;
use crate::models::{
    Actor, Diagnosis, DiagnosisInput, Encounter, EncounterStatus, LabOrder, LabOrderInput,
    NewEncounter, NewPatient, Patient, Prescription, PrescriptionInput, TriageInput, TriageRecord,
};

/// 就诊存储接口
///
/// 生产实现基于 PostgreSQL（`clinic-database`）；
/// 内存实现（`clinic_workflow::memory`）服务于测试与演示。
#[async_trait]
pub trait EncounterStore: Send + Sync {
    // ---------- 患者（外部协作方的最小接口面） ----------

    /// 登记患者
    async fn create_patient(&self, new: NewPatient, actor: &Actor, now: DateTime<Utc>)
        -> Result<Patient>;

    /// 按 ID 查询患者
    async fn patient(&self, id: Uuid) -> Result<Option<Patient>>;

    // ---------- 就诊读取 ----------

    /// 按 ID 查询就诊
    async fn encounter(&self, id: Uuid) -> Result<Option<Encounter>>;

    /// 指定机构、指定来诊日、处于给定状态集合的就诊，按 occurred_at 升序
    async fn queue_snapshot(
        &self,
        facility_id: Uuid,
        statuses: &[EncounterStatus],
        date: NaiveDate,
    ) -> Result<Vec<Encounter>>;

    /// 就诊的有效（未删除）诊断条数，完诊门槛的依据
    async fn diagnosis_count(&self, encounter_id: Uuid) -> Result<i64>;

    /// 就诊的分诊记录
    async fn triage_record(&self, encounter_id: Uuid) -> Result<Option<TriageRecord>>;

    // ---------- 就诊变更（每个方法一个原子工作单元） ----------

    /// 登记就诊：患者须存在，且当日同机构无其他有效就诊
    async fn create_encounter(
        &self,
        new: NewEncounter,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Encounter>;

    /// 认领分诊：状态须为 WAIT_TRIAGE，租约空缺/已过期/本人持有（幂等续租）
    async fn claim_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Encounter>;

    /// 释放认领：宽容语义，本人持有、无租约或租约已过期均成功；
    /// 他人持有有效租约时拒绝
    async fn release_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Encounter>;

    /// 提交分诊：写入分诊记录，WAIT_TRIAGE → TRIAGED，清除租约
    async fn submit_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        input: TriageInput,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<TriageRecord>;

    /// 医生领取：TRIAGED → WAIT_DOCTOR，设置 doctor_id（要求尚未被领取）
    async fn claim_doctor(&self, id: Uuid, doctor: &Actor, now: DateTime<Utc>)
        -> Result<Encounter>;

    /// 开始就诊：WAIT_DOCTOR → IN_CONSULT（要求 doctor_id 为本人）
    async fn start_consult(&self, id: Uuid, doctor: &Actor, now: DateTime<Utc>)
        -> Result<Encounter>;

    /// 完成就诊：IN_CONSULT → {FOR_LAB, FOR_PHARMACY, DONE}；
    /// 事务内重新核对有效诊断数 ≥ 1
    async fn complete_consult(
        &self,
        id: Uuid,
        doctor: &Actor,
        next: EncounterStatus,
        now: DateTime<Utc>,
    ) -> Result<Encounter>;

    /// 取消就诊：任何非终态 → CANCELLED
    async fn cancel_encounter(
        &self,
        id: Uuid,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Encounter>;

    // ---------- 临床内容（轻量事务包装，无租约语义） ----------

    /// 添加诊断：就诊须处于 IN_CONSULT 且由该医生接诊；有效编码不得重复
    async fn add_diagnosis(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: DiagnosisInput,
        now: DateTime<Utc>,
    ) -> Result<Diagnosis>;

    /// 移除诊断（软删除）
    async fn remove_diagnosis(
        &self,
        diagnosis_id: Uuid,
        doctor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Diagnosis>;

    /// 添加处方
    async fn add_prescription(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: PrescriptionInput,
        now: DateTime<Utc>,
    ) -> Result<Prescription>;

    /// 添加检验申请
    async fn add_lab_order(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: LabOrderInput,
        now: DateTime<Utc>,
    ) -> Result<LabOrder>;

    // ---------- 审计 ----------

    /// 按实体回放审计时间线，按写入先后排序
    async fn audit_trail(&self, entity_type: EntityType, entity_id: Uuid)
        -> Result<Vec<AuditLogEntry>>;
}
