//! 内存存储实现
//!
//! 用于测试与演示的 `EncounterStore` 实现。所有表放在同一把写锁之下，
//! 每个变更方法持锁完成"谓词检查 + 状态写入 + 审计追加"，
//! 与数据库实现的条件更新事务保持一致的语义。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use clinic_core::utils::generate_encounter_no;
use clinic_core::{
    Actor, AuditAction, AuditLogEntry, ClinicError, Diagnosis, DiagnosisInput, Encounter,
    EncounterStatus, EncounterStore, EntityType, LabOrder, LabOrderInput, LeaseState,
    NewAuditEntry, NewEncounter, NewPatient, Patient, Prescription, PrescriptionInput, Result,
    TriageInput, TriageRecord,
};

use crate::lease::{LeaseDecision, LeaseManager, ReleaseDecision};
use crate::state_machine::{EncounterEvent, EncounterStateMachine};

#[derive(Default)]
struct Inner {
    patients: HashMap<Uuid, Patient>,
    encounters: HashMap<Uuid, Encounter>,
    /// 以就诊 ID 为键，一对一
    triage_records: HashMap<Uuid, TriageRecord>,
    diagnoses: HashMap<Uuid, Diagnosis>,
    prescriptions: HashMap<Uuid, Prescription>,
    lab_orders: HashMap<Uuid, LabOrder>,
    /// 追加顺序即时间线顺序
    audit_log: Vec<AuditLogEntry>,
}

/// 内存版就诊存储
#[derive(Clone)]
pub struct MemoryEncounterStore {
    inner: Arc<RwLock<Inner>>,
    machine: Arc<EncounterStateMachine>,
}

impl MemoryEncounterStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            machine: Arc::new(EncounterStateMachine::new()),
        }
    }
}

impl Default for MemoryEncounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// 可被操作的就诊：存在、未软删、属于操作者所在机构。
    /// 任一条件不满足都折叠为 NotFound，不向调用方区分原因。
    fn encounter_for(&mut self, id: Uuid, facility_id: Uuid) -> Result<&mut Encounter> {
        match self.encounters.get_mut(&id) {
            Some(e) if e.deleted_at.is_none() && e.facility_id == facility_id => Ok(e),
            _ => Err(ClinicError::NotFound(format!("encounter {}", id))),
        }
    }

    fn push_audit(&mut self, entry: NewAuditEntry, now: DateTime<Utc>) {
        self.audit_log.push(entry.into_entry(now));
    }

    fn active_diagnosis_count(&self, encounter_id: Uuid) -> i64 {
        self.diagnoses
            .values()
            .filter(|d| d.encounter_id == encounter_id && !d.is_deleted())
            .count() as i64
    }

    /// 就诊须处于就诊中且由该医生接诊，临床内容写入的共同前置条件
    fn consulting_encounter(&mut self, encounter_id: Uuid, doctor: &Actor) -> Result<&mut Encounter> {
        let enc = self.encounter_for(encounter_id, doctor.facility_id)?;
        if enc.status != EncounterStatus::InConsult || enc.doctor_id != Some(doctor.id) {
            return Err(ClinicError::NotFound(format!("encounter {}", encounter_id)));
        }
        Ok(enc)
    }
}

#[async_trait]
impl EncounterStore for MemoryEncounterStore {
    async fn create_patient(
        &self,
        new: NewPatient,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Patient> {
        new.validate()?;
        let mut inner = self.inner.write().await;

        if inner.patients.values().any(|p| p.patient_no == new.patient_no) {
            return Err(ClinicError::Validation(format!(
                "patient_no already registered: {}",
                new.patient_no
            )));
        }

        let patient = Patient {
            id: Uuid::new_v4(),
            patient_no: new.patient_no,
            name: new.name,
            sex: new.sex,
            birth_date: new.birth_date,
            created_at: now,
            updated_at: now,
        };
        let entry = NewAuditEntry::new(
            actor,
            AuditAction::PatientRegistered,
            EntityType::Patient,
            patient.id,
        )
        .with_metadata(json!({ "patient_no": patient.patient_no }));
        inner.push_audit(entry, now);
        inner.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn patient(&self, id: Uuid) -> Result<Option<Patient>> {
        let inner = self.inner.read().await;
        Ok(inner.patients.get(&id).cloned())
    }

    async fn encounter(&self, id: Uuid) -> Result<Option<Encounter>> {
        let inner = self.inner.read().await;
        Ok(inner
            .encounters
            .get(&id)
            .filter(|e| e.deleted_at.is_none())
            .cloned())
    }

    async fn queue_snapshot(
        &self,
        facility_id: Uuid,
        statuses: &[EncounterStatus],
        date: NaiveDate,
    ) -> Result<Vec<Encounter>> {
        let inner = self.inner.read().await;
        let mut items: Vec<Encounter> = inner
            .encounters
            .values()
            .filter(|e| {
                e.deleted_at.is_none()
                    && e.facility_id == facility_id
                    && e.visit_date() == date
                    && statuses.contains(&e.status)
            })
            .cloned()
            .collect();
        items.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(items)
    }

    async fn diagnosis_count(&self, encounter_id: Uuid) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner.active_diagnosis_count(encounter_id))
    }

    async fn triage_record(&self, encounter_id: Uuid) -> Result<Option<TriageRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.triage_records.get(&encounter_id).cloned())
    }

    async fn create_encounter(
        &self,
        new: NewEncounter,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Encounter> {
        let mut inner = self.inner.write().await;

        if !inner.patients.contains_key(&new.patient_id) {
            return Err(ClinicError::NotFound(format!("patient {}", new.patient_id)));
        }

        // 同一患者当日同机构至多一条有效就诊
        let today = now.date_naive();
        let duplicate = inner.encounters.values().any(|e| {
            e.patient_id == new.patient_id
                && e.facility_id == new.facility_id
                && e.visit_date() == today
                && e.is_active()
        });
        if duplicate {
            return Err(ClinicError::DuplicateEncounter(format!(
                "patient {} already has an active encounter today",
                new.patient_id
            )));
        }

        let encounter = Encounter {
            id: Uuid::new_v4(),
            encounter_no: generate_encounter_no(today),
            patient_id: new.patient_id,
            facility_id: new.facility_id,
            status: EncounterStatus::WaitTriage,
            occurred_at: now,
            claimed_by: None,
            claimed_at: None,
            triage_by: None,
            doctor_id: None,
            consult_started_at: None,
            consult_ended_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let entry = NewAuditEntry::new(
            actor,
            AuditAction::EncounterCreated,
            EntityType::Encounter,
            encounter.id,
        )
        .with_metadata(json!({
            "encounter_no": encounter.encounter_no,
            "patient_id": encounter.patient_id,
        }));
        inner.push_audit(entry, now);
        inner.encounters.insert(encounter.id, encounter.clone());
        Ok(encounter)
    }

    async fn claim_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Encounter> {
        let leases = LeaseManager::new(ttl);
        let mut inner = self.inner.write().await;

        let enc = inner.encounter_for(id, worker.facility_id)?;
        if !enc.status.is_claimable() {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }

        let previous = enc.lease().state(now, ttl);
        match leases.try_acquire(&enc.lease(), worker.id, now) {
            LeaseDecision::Denied { .. } => {
                return Err(ClinicError::AlreadyClaimed(format!("encounter {}", id)));
            }
            LeaseDecision::Granted => {
                enc.claimed_by = Some(worker.id);
                enc.claimed_at = Some(now);
                enc.updated_at = now;
            }
        }
        let snapshot = enc.clone();

        // 接管过期租约时记下原持有人，便于事后排查
        let metadata = match previous {
            LeaseState::Expired { owner_id } => json!({ "took_over_expired_from": owner_id }),
            LeaseState::Live { .. } => json!({ "renewed": true }),
            LeaseState::Free => serde_json::Value::Null,
        };
        let entry =
            NewAuditEntry::new(worker, AuditAction::TriageClaimed, EntityType::Encounter, id)
                .with_metadata(metadata);
        inner.push_audit(entry, now);
        Ok(snapshot)
    }

    async fn release_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Encounter> {
        let leases = LeaseManager::new(ttl);
        let mut inner = self.inner.write().await;

        let enc = inner.encounter_for(id, worker.facility_id)?;
        if !enc.status.is_claimable() {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }

        match leases.release(&enc.lease(), worker.id, now) {
            ReleaseDecision::Forbidden { .. } => {
                return Err(ClinicError::Forbidden(
                    "lease is held by another worker".to_string(),
                ));
            }
            ReleaseDecision::Released => {
                enc.claimed_by = None;
                enc.claimed_at = None;
                enc.updated_at = now;
            }
        }
        let snapshot = enc.clone();

        let entry =
            NewAuditEntry::new(worker, AuditAction::TriageReleased, EntityType::Encounter, id);
        inner.push_audit(entry, now);
        Ok(snapshot)
    }

    async fn submit_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        input: TriageInput,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<TriageRecord> {
        input.validate()?;
        let mut inner = self.inner.write().await;

        let enc = inner.encounter_for(id, worker.facility_id)?;
        if enc.status != EncounterStatus::WaitTriage {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }
        // 他人持有有效租约时同样折叠为 NotFound，不泄露占用信息
        if let LeaseState::Live { owner_id } = enc.lease().state(now, ttl) {
            if owner_id != worker.id {
                return Err(ClinicError::NotFound(format!("encounter {}", id)));
            }
        }

        enc.status = self
            .machine
            .transition(&enc.status, &EncounterEvent::SubmitTriage)?;
        enc.claimed_by = None;
        enc.claimed_at = None;
        enc.triage_by = Some(worker.id);
        enc.updated_at = now;

        // 就诊与分诊记录一对一，重复提交覆盖体征数据
        let record = match inner.triage_records.get_mut(&id) {
            Some(existing) => {
                existing.temperature_c = input.temperature_c;
                existing.systolic_mmhg = input.systolic_mmhg;
                existing.diastolic_mmhg = input.diastolic_mmhg;
                existing.pulse_bpm = input.pulse_bpm;
                existing.respiratory_rate = input.respiratory_rate;
                existing.weight_kg = input.weight_kg;
                existing.height_cm = input.height_cm;
                existing.chief_complaint = input.chief_complaint;
                existing.screening_notes = input.screening_notes;
                existing.triage_by = worker.id;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let record = TriageRecord {
                    id: Uuid::new_v4(),
                    encounter_id: id,
                    temperature_c: input.temperature_c,
                    systolic_mmhg: input.systolic_mmhg,
                    diastolic_mmhg: input.diastolic_mmhg,
                    pulse_bpm: input.pulse_bpm,
                    respiratory_rate: input.respiratory_rate,
                    weight_kg: input.weight_kg,
                    height_cm: input.height_cm,
                    chief_complaint: input.chief_complaint,
                    screening_notes: input.screening_notes,
                    triage_by: worker.id,
                    created_at: now,
                    updated_at: now,
                };
                inner.triage_records.insert(id, record.clone());
                record
            }
        };

        let entry =
            NewAuditEntry::new(worker, AuditAction::TriageSubmitted, EntityType::Encounter, id)
                .with_metadata(json!({ "chief_complaint": record.chief_complaint }));
        inner.push_audit(entry, now);
        Ok(record)
    }

    async fn claim_doctor(&self, id: Uuid, doctor: &Actor, now: DateTime<Utc>) -> Result<Encounter> {
        let mut inner = self.inner.write().await;

        let enc = inner.encounter_for(id, doctor.facility_id)?;
        // 已被其他医生抢先领取的就诊不再出现于可领状态，折叠为 NotFound
        if enc.status != EncounterStatus::Triaged || enc.doctor_id.is_some() {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }

        enc.status = self
            .machine
            .transition(&enc.status, &EncounterEvent::ClaimByDoctor)?;
        enc.doctor_id = Some(doctor.id);
        enc.updated_at = now;
        let snapshot = enc.clone();

        let entry =
            NewAuditEntry::new(doctor, AuditAction::DoctorClaimed, EntityType::Encounter, id);
        inner.push_audit(entry, now);
        Ok(snapshot)
    }

    async fn start_consult(&self, id: Uuid, doctor: &Actor, now: DateTime<Utc>) -> Result<Encounter> {
        let mut inner = self.inner.write().await;

        let enc = inner.encounter_for(id, doctor.facility_id)?;
        if enc.status != EncounterStatus::WaitDoctor || enc.doctor_id != Some(doctor.id) {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }

        enc.status = self
            .machine
            .transition(&enc.status, &EncounterEvent::StartConsult)?;
        enc.consult_started_at = Some(now);
        enc.updated_at = now;
        let snapshot = enc.clone();

        let entry =
            NewAuditEntry::new(doctor, AuditAction::ConsultStarted, EntityType::Encounter, id);
        inner.push_audit(entry, now);
        Ok(snapshot)
    }

    async fn complete_consult(
        &self,
        id: Uuid,
        doctor: &Actor,
        next: EncounterStatus,
        now: DateTime<Utc>,
    ) -> Result<Encounter> {
        if !next.is_completion_target() {
            return Err(ClinicError::Validation(format!(
                "invalid completion target: {:?}",
                next
            )));
        }
        let mut inner = self.inner.write().await;

        let count = inner.active_diagnosis_count(id);
        let enc = inner.encounter_for(id, doctor.facility_id)?;
        if enc.status != EncounterStatus::InConsult || enc.doctor_id != Some(doctor.id) {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }
        // 完诊门槛在同一原子单元内核对，防止并发删除诊断后绕过
        if count < 1 {
            return Err(ClinicError::Validation(
                "at least one active diagnosis is required to complete".to_string(),
            ));
        }

        let event = EncounterStateMachine::completion_event(&next).ok_or_else(|| {
            ClinicError::Validation(format!("invalid completion target: {:?}", next))
        })?;
        enc.status = self.machine.transition(&enc.status, &event)?;
        enc.consult_ended_at = Some(now);
        enc.updated_at = now;
        let snapshot = enc.clone();

        let entry =
            NewAuditEntry::new(doctor, AuditAction::ConsultCompleted, EntityType::Encounter, id)
                .with_metadata(json!({ "next_status": next }));
        inner.push_audit(entry, now);
        Ok(snapshot)
    }

    async fn cancel_encounter(
        &self,
        id: Uuid,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Encounter> {
        let mut inner = self.inner.write().await;

        let enc = inner.encounter_for(id, actor.facility_id)?;
        if enc.status.is_terminal() {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }

        let from = enc.status;
        enc.status = self.machine.transition(&enc.status, &EncounterEvent::Cancel)?;
        enc.claimed_by = None;
        enc.claimed_at = None;
        enc.updated_at = now;
        let snapshot = enc.clone();

        let entry = NewAuditEntry::new(
            actor,
            AuditAction::EncounterCancelled,
            EntityType::Encounter,
            id,
        )
        .with_metadata(json!({ "from_status": from }));
        inner.push_audit(entry, now);
        Ok(snapshot)
    }

    async fn add_diagnosis(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: DiagnosisInput,
        now: DateTime<Utc>,
    ) -> Result<Diagnosis> {
        input.validate()?;
        let mut inner = self.inner.write().await;
        inner.consulting_encounter(encounter_id, doctor)?;

        let duplicate = inner.diagnoses.values().any(|d| {
            d.encounter_id == encounter_id && !d.is_deleted() && d.code == input.code
        });
        if duplicate {
            return Err(ClinicError::DuplicateCode(input.code));
        }

        let diagnosis = Diagnosis {
            id: Uuid::new_v4(),
            encounter_id,
            code: input.code,
            description: input.description,
            doctor_id: doctor.id,
            deleted_at: None,
            created_at: now,
        };
        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::DiagnosisAdded,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({ "diagnosis_id": diagnosis.id, "code": diagnosis.code }));
        inner.push_audit(entry, now);
        inner.diagnoses.insert(diagnosis.id, diagnosis.clone());
        Ok(diagnosis)
    }

    async fn remove_diagnosis(
        &self,
        diagnosis_id: Uuid,
        doctor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Diagnosis> {
        let mut inner = self.inner.write().await;

        let encounter_id = match inner.diagnoses.get(&diagnosis_id) {
            Some(d) if !d.is_deleted() => d.encounter_id,
            _ => return Err(ClinicError::NotFound(format!("diagnosis {}", diagnosis_id))),
        };
        inner.consulting_encounter(encounter_id, doctor)?;

        let diagnosis = match inner.diagnoses.get_mut(&diagnosis_id) {
            Some(d) => {
                d.deleted_at = Some(now);
                d.clone()
            }
            None => return Err(ClinicError::NotFound(format!("diagnosis {}", diagnosis_id))),
        };
        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::DiagnosisRemoved,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({ "diagnosis_id": diagnosis_id, "code": diagnosis.code }));
        inner.push_audit(entry, now);
        Ok(diagnosis)
    }

    async fn add_prescription(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: PrescriptionInput,
        now: DateTime<Utc>,
    ) -> Result<Prescription> {
        input.validate()?;
        let mut inner = self.inner.write().await;
        inner.consulting_encounter(encounter_id, doctor)?;

        let prescription = Prescription {
            id: Uuid::new_v4(),
            encounter_id,
            doctor_id: doctor.id,
            medication: input.medication,
            dose: input.dose,
            frequency: input.frequency,
            days: input.days,
            quantity: input.quantity,
            notes: input.notes,
            created_at: now,
        };
        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::PrescriptionAdded,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({
            "prescription_id": prescription.id,
            "medication": prescription.medication,
        }));
        inner.push_audit(entry, now);
        inner
            .prescriptions
            .insert(prescription.id, prescription.clone());
        Ok(prescription)
    }

    async fn add_lab_order(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: LabOrderInput,
        now: DateTime<Utc>,
    ) -> Result<LabOrder> {
        input.validate()?;
        let mut inner = self.inner.write().await;
        inner.consulting_encounter(encounter_id, doctor)?;

        let order = LabOrder {
            id: Uuid::new_v4(),
            encounter_id,
            doctor_id: doctor.id,
            test_code: input.test_code,
            test_name: input.test_name,
            specimen: input.specimen,
            notes: input.notes,
            created_at: now,
        };
        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::LabOrderAdded,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({ "lab_order_id": order.id, "test_code": order.test_code }));
        inner.push_audit(entry, now);
        inner.lab_orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn audit_trail(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit_log
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::ActorRole;

    const TTL: i64 = 15;

    fn ttl() -> Duration {
        Duration::minutes(TTL)
    }

    struct Clinic {
        store: MemoryEncounterStore,
        facility: Uuid,
        registrar: Actor,
        nurse: Actor,
        doctor: Actor,
    }

    impl Clinic {
        fn new() -> Self {
            let facility = Uuid::new_v4();
            Self {
                store: MemoryEncounterStore::new(),
                facility,
                registrar: Actor::new("挂号员", ActorRole::Registration, facility),
                nurse: Actor::new("护士小王", ActorRole::Nurse, facility),
                doctor: Actor::new("李医生", ActorRole::Doctor, facility),
            }
        }

        async fn new_encounter(&self, now: DateTime<Utc>) -> Encounter {
            let patient = self
                .store
                .create_patient(
                    NewPatient {
                        patient_no: format!("P{}", Uuid::new_v4().simple()),
                        name: "张三".to_string(),
                        sex: None,
                        birth_date: None,
                    },
                    &self.registrar,
                    now,
                )
                .await
                .unwrap();
            self.store
                .create_encounter(
                    NewEncounter {
                        patient_id: patient.id,
                        facility_id: self.facility,
                    },
                    &self.registrar,
                    now,
                )
                .await
                .unwrap()
        }
    }

    fn triage_input() -> TriageInput {
        TriageInput {
            chief_complaint: "咳嗽三天".to_string(),
            temperature_c: Some(37.8),
            pulse_bpm: Some(82),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_encounter_starts_waiting() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        assert_eq!(enc.status, EncounterStatus::WaitTriage);
        assert!(clinic_core::utils::is_valid_encounter_no(&enc.encounter_no));
        let fetched = clinic.store.encounter(enc.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, enc.id);
    }

    #[tokio::test]
    async fn test_duplicate_encounter_same_day_rejected() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        let result = clinic
            .store
            .create_encounter(
                NewEncounter {
                    patient_id: enc.patient_id,
                    facility_id: clinic.facility,
                },
                &clinic.registrar,
                now,
            )
            .await;
        assert!(matches!(result, Err(ClinicError::DuplicateEncounter(_))));

        // 取消后同日可重新登记
        clinic
            .store
            .cancel_encounter(enc.id, &clinic.registrar, now)
            .await
            .unwrap();
        let again = clinic
            .store
            .create_encounter(
                NewEncounter {
                    patient_id: enc.patient_id,
                    facility_id: clinic.facility,
                },
                &clinic.registrar,
                now,
            )
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_claim_conflict_and_expiry() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let other_nurse = Actor::new("护士小陈", ActorRole::Nurse, clinic.facility);
        let enc = clinic.new_encounter(now).await;

        let claimed = clinic
            .store
            .claim_triage(enc.id, &clinic.nurse, now, ttl())
            .await
            .unwrap();
        assert_eq!(claimed.claimed_by, Some(clinic.nurse.id));

        // 有效租约期间他人认领被拒
        let conflict = clinic
            .store
            .claim_triage(enc.id, &other_nurse, now + Duration::minutes(5), ttl())
            .await;
        assert!(matches!(conflict, Err(ClinicError::AlreadyClaimed(_))));

        // 过期后他人可以接管
        let later = now + Duration::minutes(16);
        let taken = clinic
            .store
            .claim_triage(enc.id, &other_nurse, later, ttl())
            .await
            .unwrap();
        assert_eq!(taken.claimed_by, Some(other_nurse.id));
    }

    #[tokio::test]
    async fn test_release_rules() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let other_nurse = Actor::new("护士小陈", ActorRole::Nurse, clinic.facility);
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .claim_triage(enc.id, &clinic.nurse, now, ttl())
            .await
            .unwrap();

        // 他人释放有效租约被拒
        let denied = clinic
            .store
            .release_triage(enc.id, &other_nurse, now + Duration::minutes(1), ttl())
            .await;
        assert!(matches!(denied, Err(ClinicError::Forbidden(_))));

        // 本人释放成功，租约字段清空
        let released = clinic
            .store
            .release_triage(enc.id, &clinic.nurse, now + Duration::minutes(2), ttl())
            .await
            .unwrap();
        assert_eq!(released.claimed_by, None);
        assert_eq!(released.claimed_at, None);

        // 空租约重复释放幂等成功
        let again = clinic
            .store
            .release_triage(enc.id, &other_nurse, now + Duration::minutes(3), ttl())
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_submit_triage_transitions_and_clears_lease() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .claim_triage(enc.id, &clinic.nurse, now, ttl())
            .await
            .unwrap();
        let record = clinic
            .store
            .submit_triage(enc.id, &clinic.nurse, triage_input(), now, ttl())
            .await
            .unwrap();
        assert_eq!(record.encounter_id, enc.id);
        assert_eq!(record.triage_by, clinic.nurse.id);

        let after = clinic.store.encounter(enc.id).await.unwrap().unwrap();
        assert_eq!(after.status, EncounterStatus::Triaged);
        assert_eq!(after.claimed_by, None);
        assert_eq!(after.triage_by, Some(clinic.nurse.id));

        // 已分诊的就诊不能再次提交
        let repeat = clinic
            .store
            .submit_triage(enc.id, &clinic.nurse, triage_input(), now, ttl())
            .await;
        assert!(matches!(repeat, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_over_foreign_live_lease_not_found() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let other_nurse = Actor::new("护士小陈", ActorRole::Nurse, clinic.facility);
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .claim_triage(enc.id, &clinic.nurse, now, ttl())
            .await
            .unwrap();

        // 他人占用期间提交分诊折叠为 NotFound，而非 AlreadyClaimed
        let result = clinic
            .store
            .submit_triage(enc.id, &other_nurse, triage_input(), now, ttl())
            .await;
        assert!(matches!(result, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_doctor_flow_to_done() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .submit_triage(enc.id, &clinic.nurse, triage_input(), now, ttl())
            .await
            .unwrap();
        clinic
            .store
            .claim_doctor(enc.id, &clinic.doctor, now)
            .await
            .unwrap();
        clinic
            .store
            .start_consult(enc.id, &clinic.doctor, now)
            .await
            .unwrap();

        // 无诊断时不能完诊
        let blocked = clinic
            .store
            .complete_consult(enc.id, &clinic.doctor, EncounterStatus::Done, now)
            .await;
        assert!(matches!(blocked, Err(ClinicError::Validation(_))));

        clinic
            .store
            .add_diagnosis(
                enc.id,
                &clinic.doctor,
                DiagnosisInput {
                    code: "J06.9".to_string(),
                    description: "急性上呼吸道感染".to_string(),
                },
                now,
            )
            .await
            .unwrap();
        let done = clinic
            .store
            .complete_consult(enc.id, &clinic.doctor, EncounterStatus::Done, now)
            .await
            .unwrap();
        assert_eq!(done.status, EncounterStatus::Done);
        assert!(done.consult_ended_at.is_some());
    }

    #[tokio::test]
    async fn test_doctor_claim_race_loser_not_found() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let other_doctor = Actor::new("王医生", ActorRole::Doctor, clinic.facility);
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .submit_triage(enc.id, &clinic.nurse, triage_input(), now, ttl())
            .await
            .unwrap();
        clinic
            .store
            .claim_doctor(enc.id, &clinic.doctor, now)
            .await
            .unwrap();

        let loser = clinic.store.claim_doctor(enc.id, &other_doctor, now).await;
        assert!(matches!(loser, Err(ClinicError::NotFound(_))));

        // 他人领取的就诊不能由别的医生开始问诊
        let steal = clinic.store.start_consult(enc.id, &other_doctor, now).await;
        assert!(matches!(steal, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_diagnosis_code_and_soft_delete() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .submit_triage(enc.id, &clinic.nurse, triage_input(), now, ttl())
            .await
            .unwrap();
        clinic
            .store
            .claim_doctor(enc.id, &clinic.doctor, now)
            .await
            .unwrap();
        clinic
            .store
            .start_consult(enc.id, &clinic.doctor, now)
            .await
            .unwrap();

        let input = DiagnosisInput {
            code: "J06.9".to_string(),
            description: "急性上呼吸道感染".to_string(),
        };
        let first = clinic
            .store
            .add_diagnosis(enc.id, &clinic.doctor, input.clone(), now)
            .await
            .unwrap();

        let duplicate = clinic
            .store
            .add_diagnosis(enc.id, &clinic.doctor, input.clone(), now)
            .await;
        assert!(matches!(duplicate, Err(ClinicError::DuplicateCode(_))));

        // 软删除后编码可重新使用
        clinic
            .store
            .remove_diagnosis(first.id, &clinic.doctor, now)
            .await
            .unwrap();
        assert_eq!(clinic.store.diagnosis_count(enc.id).await.unwrap(), 0);
        let replaced = clinic
            .store
            .add_diagnosis(enc.id, &clinic.doctor, input, now)
            .await;
        assert!(replaced.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_facility_collapsed_to_not_found() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let outsider = Actor::new("外院护士", ActorRole::Nurse, Uuid::new_v4());
        let enc = clinic.new_encounter(now).await;

        let result = clinic
            .store
            .claim_triage(enc.id, &outsider, now, ttl())
            .await;
        assert!(matches!(result, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_terminal_not_found() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .cancel_encounter(enc.id, &clinic.nurse, now)
            .await
            .unwrap();
        let again = clinic
            .store
            .cancel_encounter(enc.id, &clinic.nurse, now)
            .await;
        assert!(matches!(again, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_audit_trail_records_full_timeline() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        clinic
            .store
            .claim_triage(enc.id, &clinic.nurse, now, ttl())
            .await
            .unwrap();
        clinic
            .store
            .submit_triage(enc.id, &clinic.nurse, triage_input(), now, ttl())
            .await
            .unwrap();

        let trail = clinic
            .store
            .audit_trail(EntityType::Encounter, enc.id)
            .await
            .unwrap();
        let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::EncounterCreated,
                AuditAction::TriageClaimed,
                AuditAction::TriageSubmitted,
            ]
        );
        assert_eq!(trail[1].actor_name, clinic.nurse.name);
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let clinic = Clinic::new();
        let now = Utc::now();
        let enc = clinic.new_encounter(now).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = clinic.store.clone();
            let nurse = Actor::new(format!("护士{}", i), ActorRole::Nurse, clinic.facility);
            handles.push(tokio::spawn(async move {
                store.claim_triage(enc.id, &nurse, now, ttl()).await
            }));
        }

        let mut granted = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(ClinicError::AlreadyClaimed(_)) => denied += 1,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(denied, 7);
    }
}
