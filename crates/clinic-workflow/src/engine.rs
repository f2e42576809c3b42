//! 工作流引擎
//!
//! 协调角色校验、队列策略、租约判定与存储条件更新的统一业务入口。
//! 就诊行上的认领与状态字段只允许经由本门面变更，
//! 保证条件更新纪律不被绕过。

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use clinic_core::{
    Actor, ActorRole, AuditLogEntry, ClinicError, Diagnosis, DiagnosisInput, Encounter,
    EncounterStatus, EncounterStore, EntityType, LabOrder, LabOrderInput, NewEncounter,
    NewPatient, Patient, Prescription, PrescriptionInput, Result, TriageInput, TriageRecord,
};

use crate::lease::LeaseManager;
use crate::queue::{QueueItem, QueueItemState, QueueKind, QueuePolicy};

/// 工作流引擎
///
/// 对存储实现泛型化：生产环境使用数据库存储，测试与演示使用内存存储。
pub struct WorkflowEngine<S: EncounterStore> {
    store: Arc<S>,
    leases: LeaseManager,
    queues: QueuePolicy,
}

impl<S: EncounterStore> WorkflowEngine<S> {
    /// 创建使用指定租约时长的工作流引擎
    pub fn new(store: Arc<S>, lease_ttl: Duration) -> Self {
        Self {
            store,
            leases: LeaseManager::new(lease_ttl),
            queues: QueuePolicy::new(lease_ttl),
        }
    }

    /// 使用默认 15 分钟租约时长
    pub fn with_default_ttl(store: Arc<S>) -> Self {
        Self::new(store, LeaseManager::default().ttl())
    }

    /// 获取存储实例
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 获取租约管理器实例
    pub fn lease_manager(&self) -> &LeaseManager {
        &self.leases
    }

    // ========== 患者与就诊登记 ==========

    /// 登记患者
    pub async fn register_patient(&self, new: NewPatient, actor: &Actor) -> Result<Patient> {
        require_role(actor, &[ActorRole::Registration, ActorRole::Nurse])?;
        let patient = self.store.create_patient(new, actor, Utc::now()).await?;
        tracing::info!("Registered patient {} ({})", patient.id, patient.patient_no);
        Ok(patient)
    }

    /// 查询患者
    pub async fn patient(&self, id: Uuid) -> Result<Patient> {
        self.store
            .patient(id)
            .await?
            .ok_or_else(|| ClinicError::NotFound(format!("patient {}", id)))
    }

    /// 登记就诊（进入分诊队列）
    pub async fn create_encounter(&self, new: NewEncounter, actor: &Actor) -> Result<Encounter> {
        require_role(actor, &[ActorRole::Registration, ActorRole::Nurse])?;
        if new.facility_id != actor.facility_id {
            return Err(ClinicError::Forbidden(
                "cannot register an encounter for another facility".to_string(),
            ));
        }
        let encounter = self.store.create_encounter(new, actor, Utc::now()).await?;
        tracing::info!(
            "Created encounter {} ({}) for patient {}",
            encounter.id,
            encounter.encounter_no,
            encounter.patient_id
        );
        Ok(encounter)
    }

    /// 就诊详情（跨机构访问折叠为 NotFound）
    pub async fn encounter(&self, id: Uuid, actor: &Actor) -> Result<Encounter> {
        let encounter = self
            .store
            .encounter(id)
            .await?
            .filter(|e| e.facility_id == actor.facility_id)
            .ok_or_else(|| ClinicError::NotFound(format!("encounter {}", id)))?;
        Ok(encounter)
    }

    /// 就诊的分诊记录
    pub async fn triage_record(&self, encounter_id: Uuid, actor: &Actor) -> Result<TriageRecord> {
        self.encounter(encounter_id, actor).await?;
        self.store
            .triage_record(encounter_id)
            .await?
            .ok_or_else(|| ClinicError::NotFound(format!("triage record for {}", encounter_id)))
    }

    // ========== 队列 ==========

    /// 查看者视角的队列：逐条标注可操作状态
    pub async fn visible_queue(
        &self,
        kind: QueueKind,
        actor: &Actor,
        date: Option<NaiveDate>,
    ) -> Result<Vec<QueueItem>> {
        match kind {
            QueueKind::Triage => require_role(actor, &[ActorRole::Nurse])?,
            QueueKind::Doctor => require_role(actor, &[ActorRole::Doctor])?,
        }
        let now = Utc::now();
        let date = date.unwrap_or_else(|| now.date_naive());
        let snapshot = self
            .store
            .queue_snapshot(actor.facility_id, kind.entry_statuses(), date)
            .await?;
        Ok(self.queues.annotate(kind, snapshot, actor.id, now))
    }

    // ========== 分诊 ==========

    /// 认领分诊队列条目
    ///
    /// 先用队列策略做快速裁决（禁止跳号、同时只许持有一条），
    /// 最终裁决权仍在存储层的条件更新。
    pub async fn claim_triage(&self, id: Uuid, actor: &Actor) -> Result<Encounter> {
        require_role(actor, &[ActorRole::Nurse])?;
        let now = Utc::now();

        let snapshot = self
            .store
            .queue_snapshot(
                actor.facility_id,
                QueueKind::Triage.entry_statuses(),
                now.date_naive(),
            )
            .await?;
        match self
            .queues
            .item_state(QueueKind::Triage, snapshot, id, actor.id, now)
        {
            None | Some(QueueItemState::Disabled) => {
                tracing::warn!("Worker {} denied triage claim on {}: not claimable", actor.id, id);
                return Err(ClinicError::NotFound(format!("encounter {}", id)));
            }
            Some(QueueItemState::ClaimedByOther) => {
                tracing::warn!("Worker {} denied triage claim on {}: held by another", actor.id, id);
                return Err(ClinicError::AlreadyClaimed(format!("encounter {}", id)));
            }
            Some(QueueItemState::Available) | Some(QueueItemState::Selected) => {}
        }

        let encounter = self
            .store
            .claim_triage(id, actor, now, self.leases.ttl())
            .await?;
        tracing::info!("Worker {} claimed triage for encounter {}", actor.id, id);
        Ok(encounter)
    }

    /// 释放分诊认领
    pub async fn release_triage(&self, id: Uuid, actor: &Actor) -> Result<Encounter> {
        require_role(actor, &[ActorRole::Nurse])?;
        let encounter = self
            .store
            .release_triage(id, actor, Utc::now(), self.leases.ttl())
            .await?;
        tracing::info!("Worker {} released triage claim on encounter {}", actor.id, id);
        Ok(encounter)
    }

    /// 提交分诊结果
    pub async fn submit_triage(
        &self,
        id: Uuid,
        input: TriageInput,
        actor: &Actor,
    ) -> Result<TriageRecord> {
        require_role(actor, &[ActorRole::Nurse])?;
        let record = self
            .store
            .submit_triage(id, actor, input, Utc::now(), self.leases.ttl())
            .await?;
        tracing::info!("Worker {} submitted triage for encounter {}", actor.id, id);
        Ok(record)
    }

    // ========== 医生 ==========

    /// 医生从候诊队列领取就诊
    pub async fn claim_doctor_queue_item(&self, id: Uuid, actor: &Actor) -> Result<Encounter> {
        require_role(actor, &[ActorRole::Doctor])?;
        let encounter = self.store.claim_doctor(id, actor, Utc::now()).await?;
        tracing::info!("Doctor {} claimed encounter {}", actor.id, id);
        Ok(encounter)
    }

    /// 开始问诊
    pub async fn start_consultation(&self, id: Uuid, actor: &Actor) -> Result<Encounter> {
        require_role(actor, &[ActorRole::Doctor])?;
        let encounter = self.store.start_consult(id, actor, Utc::now()).await?;
        tracing::info!("Doctor {} started consultation on encounter {}", actor.id, id);
        Ok(encounter)
    }

    /// 完成问诊并选择去向
    pub async fn complete_consultation(
        &self,
        id: Uuid,
        next: EncounterStatus,
        actor: &Actor,
    ) -> Result<Encounter> {
        require_role(actor, &[ActorRole::Doctor])?;
        let encounter = self
            .store
            .complete_consult(id, actor, next, Utc::now())
            .await?;
        tracing::info!(
            "Doctor {} completed encounter {} -> {:?}",
            actor.id,
            id,
            encounter.status
        );
        Ok(encounter)
    }

    /// 取消就诊（任何在岗角色可执行）
    pub async fn cancel_encounter(&self, id: Uuid, actor: &Actor) -> Result<Encounter> {
        let encounter = self.store.cancel_encounter(id, actor, Utc::now()).await?;
        tracing::info!("Encounter {} cancelled by {}", id, actor.id);
        Ok(encounter)
    }

    // ========== 临床内容 ==========

    /// 添加诊断
    pub async fn add_diagnosis(
        &self,
        encounter_id: Uuid,
        input: DiagnosisInput,
        actor: &Actor,
    ) -> Result<Diagnosis> {
        require_role(actor, &[ActorRole::Doctor])?;
        let diagnosis = self
            .store
            .add_diagnosis(encounter_id, actor, input, Utc::now())
            .await?;
        tracing::info!(
            "Doctor {} added diagnosis {} to encounter {}",
            actor.id,
            diagnosis.code,
            encounter_id
        );
        Ok(diagnosis)
    }

    /// 移除诊断（软删除）
    pub async fn remove_diagnosis(&self, diagnosis_id: Uuid, actor: &Actor) -> Result<Diagnosis> {
        require_role(actor, &[ActorRole::Doctor])?;
        let diagnosis = self
            .store
            .remove_diagnosis(diagnosis_id, actor, Utc::now())
            .await?;
        tracing::info!("Doctor {} removed diagnosis {}", actor.id, diagnosis_id);
        Ok(diagnosis)
    }

    /// 添加处方
    pub async fn add_prescription(
        &self,
        encounter_id: Uuid,
        input: PrescriptionInput,
        actor: &Actor,
    ) -> Result<Prescription> {
        require_role(actor, &[ActorRole::Doctor])?;
        let prescription = self
            .store
            .add_prescription(encounter_id, actor, input, Utc::now())
            .await?;
        tracing::info!(
            "Doctor {} added prescription to encounter {}",
            actor.id,
            encounter_id
        );
        Ok(prescription)
    }

    /// 添加检验申请
    pub async fn add_lab_order(
        &self,
        encounter_id: Uuid,
        input: LabOrderInput,
        actor: &Actor,
    ) -> Result<LabOrder> {
        require_role(actor, &[ActorRole::Doctor])?;
        let order = self
            .store
            .add_lab_order(encounter_id, actor, input, Utc::now())
            .await?;
        tracing::info!(
            "Doctor {} added lab order to encounter {}",
            actor.id,
            encounter_id
        );
        Ok(order)
    }

    // ========== 审计 ==========

    /// 就诊的审计时间线
    pub async fn encounter_audit(
        &self,
        encounter_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<AuditLogEntry>> {
        self.encounter(encounter_id, actor).await?;
        self.store
            .audit_trail(EntityType::Encounter, encounter_id)
            .await
    }
}

/// 角色门禁：管理员放行一切，其余角色须在许可列表内
fn require_role(actor: &Actor, allowed: &[ActorRole]) -> Result<()> {
    if actor.role == ActorRole::Admin || allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(ClinicError::Forbidden(format!(
            "role {} may not perform this operation",
            actor.role.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEncounterStore;
    use clinic_core::AuditAction;

    struct Harness {
        engine: WorkflowEngine<MemoryEncounterStore>,
        facility: Uuid,
        registrar: Actor,
        nurse_a: Actor,
        nurse_b: Actor,
        doctor: Actor,
    }

    impl Harness {
        fn new() -> Self {
            let facility = Uuid::new_v4();
            Self {
                engine: WorkflowEngine::with_default_ttl(Arc::new(MemoryEncounterStore::new())),
                facility,
                registrar: Actor::new("挂号员", ActorRole::Registration, facility),
                nurse_a: Actor::new("护士A", ActorRole::Nurse, facility),
                nurse_b: Actor::new("护士B", ActorRole::Nurse, facility),
                doctor: Actor::new("李医生", ActorRole::Doctor, facility),
            }
        }

        async fn register(&self, name: &str) -> Encounter {
            let patient = self
                .engine
                .register_patient(
                    NewPatient {
                        patient_no: format!("P{}", Uuid::new_v4().simple()),
                        name: name.to_string(),
                        sex: None,
                        birth_date: None,
                    },
                    &self.registrar,
                )
                .await
                .unwrap();
            self.engine
                .create_encounter(
                    NewEncounter {
                        patient_id: patient.id,
                        facility_id: self.facility,
                    },
                    &self.registrar,
                )
                .await
                .unwrap()
        }
    }

    fn vitals() -> TriageInput {
        TriageInput {
            chief_complaint: "发热伴咽痛".to_string(),
            temperature_c: Some(38.2),
            pulse_bpm: Some(92),
            systolic_mmhg: Some(118),
            diastolic_mmhg: Some(76),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_encounter_lifecycle() {
        let h = Harness::new();
        let enc = h.register("张三").await;
        assert_eq!(enc.status, EncounterStatus::WaitTriage);

        // 护士A认领，护士B在有效租约期间被拒
        h.engine.claim_triage(enc.id, &h.nurse_a).await.unwrap();
        let denied = h.engine.claim_triage(enc.id, &h.nurse_b).await;
        assert!(matches!(denied, Err(ClinicError::AlreadyClaimed(_))));

        // 护士A提交分诊，状态前进且租约清空
        h.engine
            .submit_triage(enc.id, vitals(), &h.nurse_a)
            .await
            .unwrap();
        let triaged = h.engine.encounter(enc.id, &h.nurse_a).await.unwrap();
        assert_eq!(triaged.status, EncounterStatus::Triaged);
        assert_eq!(triaged.claimed_by, None);

        // 医生领取并开始问诊
        h.engine
            .claim_doctor_queue_item(enc.id, &h.doctor)
            .await
            .unwrap();
        h.engine.start_consultation(enc.id, &h.doctor).await.unwrap();

        // 无诊断时完诊被验证错误拦下
        let gate = h
            .engine
            .complete_consultation(enc.id, EncounterStatus::Done, &h.doctor)
            .await;
        assert!(matches!(gate, Err(ClinicError::Validation(_))));

        h.engine
            .add_diagnosis(
                enc.id,
                DiagnosisInput {
                    code: "J02.9".to_string(),
                    description: "急性咽炎".to_string(),
                },
                &h.doctor,
            )
            .await
            .unwrap();
        let done = h
            .engine
            .complete_consultation(enc.id, EncounterStatus::Done, &h.doctor)
            .await
            .unwrap();
        assert_eq!(done.status, EncounterStatus::Done);
        assert!(done.consult_ended_at.is_some());

        // 审计时间线完整覆盖每一步
        let trail = h.engine.encounter_audit(enc.id, &h.doctor).await.unwrap();
        let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::EncounterCreated,
                AuditAction::TriageClaimed,
                AuditAction::TriageSubmitted,
                AuditAction::DoctorClaimed,
                AuditAction::ConsultStarted,
                AuditAction::DiagnosisAdded,
                AuditAction::ConsultCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_role_checks_are_enforced() {
        let h = Harness::new();
        let enc = h.register("张三").await;

        // 挂号员不能做分诊认领，医生不能替护士分诊
        let r = h.engine.claim_triage(enc.id, &h.registrar).await;
        assert!(matches!(r, Err(ClinicError::Forbidden(_))));
        let r = h.engine.submit_triage(enc.id, vitals(), &h.doctor).await;
        assert!(matches!(r, Err(ClinicError::Forbidden(_))));

        // 护士不能执行医生领取
        let r = h.engine.claim_doctor_queue_item(enc.id, &h.nurse_a).await;
        assert!(matches!(r, Err(ClinicError::Forbidden(_))));

        // 管理员放行
        let admin = Actor::new("管理员", ActorRole::Admin, h.facility);
        let r = h.engine.claim_triage(enc.id, &admin).await;
        assert!(r.is_ok());
    }

    #[tokio::test]
    async fn test_no_skip_is_enforced_at_claim_time() {
        let h = Harness::new();
        let first = h.register("患者一").await;
        let second = h.register("患者二").await;

        // 队首空闲时直接认领第二条会被策略拒绝
        let skipped = h.engine.claim_triage(second.id, &h.nurse_a).await;
        assert!(matches!(skipped, Err(ClinicError::NotFound(_))));

        // 队首被占用后第二条解锁
        h.engine.claim_triage(first.id, &h.nurse_a).await.unwrap();
        let unlocked = h.engine.claim_triage(second.id, &h.nurse_b).await;
        assert!(unlocked.is_ok());

        // 已持有一条的护士不能再领
        let queue = h
            .engine
            .visible_queue(QueueKind::Triage, &h.nurse_a, None)
            .await
            .unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue
            .iter()
            .all(|i| i.state == QueueItemState::Selected || i.state == QueueItemState::Disabled));
    }

    #[tokio::test]
    async fn test_idempotent_reclaim_by_holder() {
        let h = Harness::new();
        let enc = h.register("张三").await;

        let first = h.engine.claim_triage(enc.id, &h.nurse_a).await.unwrap();
        let second = h.engine.claim_triage(enc.id, &h.nurse_a).await.unwrap();
        assert_eq!(first.claimed_by, second.claimed_by);
        // 续租只更新时间戳，不产生第二条租约
        assert!(second.claimed_at >= first.claimed_at);
    }

    #[tokio::test]
    async fn test_doctor_queue_view_and_claim() {
        let h = Harness::new();
        let enc = h.register("张三").await;
        h.engine.claim_triage(enc.id, &h.nurse_a).await.unwrap();
        h.engine
            .submit_triage(enc.id, vitals(), &h.nurse_a)
            .await
            .unwrap();

        let queue = h
            .engine
            .visible_queue(QueueKind::Doctor, &h.doctor, None)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].state, QueueItemState::Available);

        h.engine
            .claim_doctor_queue_item(enc.id, &h.doctor)
            .await
            .unwrap();
        let queue = h
            .engine
            .visible_queue(QueueKind::Doctor, &h.doctor, None)
            .await
            .unwrap();
        assert_eq!(queue[0].state, QueueItemState::Selected);

        // 另一位医生视角：已被领取
        let other = Actor::new("王医生", ActorRole::Doctor, h.facility);
        let queue = h
            .engine
            .visible_queue(QueueKind::Doctor, &other, None)
            .await
            .unwrap();
        assert_eq!(queue[0].state, QueueItemState::ClaimedByOther);
    }

    #[tokio::test]
    async fn test_release_returns_item_to_queue() {
        let h = Harness::new();
        let enc = h.register("张三").await;

        h.engine.claim_triage(enc.id, &h.nurse_a).await.unwrap();
        h.engine.release_triage(enc.id, &h.nurse_a).await.unwrap();

        // 释放后另一位护士可以认领
        let reclaimed = h.engine.claim_triage(enc.id, &h.nurse_b).await;
        assert!(reclaimed.is_ok());
    }

    #[tokio::test]
    async fn test_cross_facility_reads_collapse_to_not_found() {
        let h = Harness::new();
        let enc = h.register("张三").await;

        let outsider = Actor::new("外院医生", ActorRole::Doctor, Uuid::new_v4());
        let r = h.engine.encounter(enc.id, &outsider).await;
        assert!(matches!(r, Err(ClinicError::NotFound(_))));
        let r = h.engine.encounter_audit(enc.id, &outsider).await;
        assert!(matches!(r, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_complete_requires_valid_target() {
        let h = Harness::new();
        let enc = h.register("张三").await;
        h.engine
            .submit_triage(enc.id, vitals(), &h.nurse_a)
            .await
            .unwrap();
        h.engine
            .claim_doctor_queue_item(enc.id, &h.doctor)
            .await
            .unwrap();
        h.engine.start_consultation(enc.id, &h.doctor).await.unwrap();
        h.engine
            .add_diagnosis(
                enc.id,
                DiagnosisInput {
                    code: "J02.9".to_string(),
                    description: "急性咽炎".to_string(),
                },
                &h.doctor,
            )
            .await
            .unwrap();

        // 完诊去向只允许检验、药房或完成
        let bad = h
            .engine
            .complete_consultation(enc.id, EncounterStatus::Cancelled, &h.doctor)
            .await;
        assert!(matches!(bad, Err(ClinicError::Validation(_))));

        let routed = h
            .engine
            .complete_consultation(enc.id, EncounterStatus::ForPharmacy, &h.doctor)
            .await
            .unwrap();
        assert_eq!(routed.status, EncounterStatus::ForPharmacy);
    }
}
