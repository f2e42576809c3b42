//! 基于 PostgreSQL 的就诊存储
//!
//! 所有"检查后写入"都压进单条条件 UPDATE 的 WHERE 谓词（租约、状态、
//! 接诊医生、机构、软删除标记），写入与审计追加在同一事务内提交。
//! 条件更新影响 0 行时回读当前行，用纯租约规则区分
//! `AlreadyClaimed`/`Forbidden` 与折叠后的 `NotFound`。

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use clinic_core::{
    Actor, AuditAction, AuditLogEntry, ClinicError, Diagnosis, DiagnosisInput, Encounter,
    EncounterStatus, EncounterStore, EntityType, LabOrder, LabOrderInput, LeaseState,
    NewAuditEntry, NewEncounter, NewPatient, Patient, Prescription, PrescriptionInput, Result,
    TriageInput, TriageRecord,
};
use clinic_core::utils::generate_encounter_no;

use crate::models::{
    sex_to_str, status_to_str, DbAuditLog, DbDiagnosis, DbEncounter, DbLabOrder, DbPatient,
    DbPrescription, DbTriageRecord,
};

/// PostgreSQL 版就诊存储
pub struct PgEncounterStore {
    pool: PgPool,
}

impl PgEncounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在当前事务内追加一条审计记录
    async fn insert_audit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: NewAuditEntry,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entry = entry.into_entry(now);
        sqlx::query(r#"
            INSERT INTO audit_log (id, actor_id, actor_name, action, entity_type, entity_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#)
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.actor_name)
        .bind(entry.action.as_str())
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(())
    }

    /// 回读就诊行（失败路径的分类依据，不加任何过滤）
    async fn read_back(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Encounter>> {
        let row = sqlx::query_as::<_, DbEncounter>("SELECT * FROM encounters WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.map(Encounter::from))
    }

    /// 就诊须处于就诊中且由该医生接诊，临床内容写入的共同前置条件
    async fn consulting_encounter(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        encounter_id: Uuid,
        doctor: &Actor,
    ) -> Result<Encounter> {
        let row = sqlx::query_as::<_, DbEncounter>(r#"
            SELECT * FROM encounters
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $2
              AND status = 'IN_CONSULT' AND doctor_id = $3
        "#)
        .bind(encounter_id)
        .bind(doctor.facility_id)
        .bind(doctor.id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        row.map(Encounter::from)
            .ok_or_else(|| ClinicError::NotFound(format!("encounter {}", encounter_id)))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e.as_database_error(), Some(db) if db.is_unique_violation())
}

#[async_trait]
impl EncounterStore for PgEncounterStore {
    // ========== 患者相关操作 ==========

    async fn create_patient(
        &self,
        new: NewPatient,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Patient> {
        new.validate()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DbPatient>(r#"
            INSERT INTO patients (id, patient_no, name, sex, birth_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
        "#)
        .bind(id)
        .bind(&new.patient_no)
        .bind(&new.name)
        .bind(new.sex.as_ref().map(sex_to_str))
        .bind(new.birth_date)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ClinicError::Validation(format!("patient_no already registered: {}", new.patient_no))
            } else {
                ClinicError::Database(e.to_string())
            }
        })?;

        let entry = NewAuditEntry::new(actor, AuditAction::PatientRegistered, EntityType::Patient, id)
            .with_metadata(json!({ "patient_no": new.patient_no }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn patient(&self, id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.map(Patient::from))
    }

    // ========== 就诊读取 ==========

    async fn encounter(&self, id: Uuid) -> Result<Option<Encounter>> {
        let row = sqlx::query_as::<_, DbEncounter>(
            "SELECT * FROM encounters WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.map(Encounter::from))
    }

    async fn queue_snapshot(
        &self,
        facility_id: Uuid,
        statuses: &[EncounterStatus],
        date: NaiveDate,
    ) -> Result<Vec<Encounter>> {
        let status_strs: Vec<String> = statuses
            .iter()
            .map(|s| status_to_str(*s).to_string())
            .collect();
        let rows = sqlx::query_as::<_, DbEncounter>(r#"
            SELECT * FROM encounters
            WHERE facility_id = $1 AND occurred_on = $2 AND deleted_at IS NULL
              AND status = ANY($3)
            ORDER BY occurred_at ASC, id ASC
        "#)
        .bind(facility_id)
        .bind(date)
        .bind(status_strs)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(Encounter::from).collect())
    }

    async fn diagnosis_count(&self, encounter_id: Uuid) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM diagnoses WHERE encounter_id = $1 AND deleted_at IS NULL",
        )
        .bind(encounter_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))
    }

    async fn triage_record(&self, encounter_id: Uuid) -> Result<Option<TriageRecord>> {
        let row = sqlx::query_as::<_, DbTriageRecord>(
            "SELECT * FROM triage_records WHERE encounter_id = $1",
        )
        .bind(encounter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.map(TriageRecord::from))
    }

    // ========== 就诊变更 ==========

    async fn create_encounter(
        &self,
        new: NewEncounter,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Encounter> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let patient_exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM patients WHERE id = $1",
        )
        .bind(new.patient_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        if patient_exists == 0 {
            return Err(ClinicError::NotFound(format!("patient {}", new.patient_id)));
        }

        // 先显式检查当日重复，部分唯一索引兜底并发竞争
        let today = now.date_naive();
        let duplicates = sqlx::query_scalar::<_, i64>(r#"
            SELECT COUNT(*) FROM encounters
            WHERE patient_id = $1 AND facility_id = $2 AND occurred_on = $3
              AND deleted_at IS NULL AND status <> 'CANCELLED'
        "#)
        .bind(new.patient_id)
        .bind(new.facility_id)
        .bind(today)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        if duplicates > 0 {
            return Err(ClinicError::DuplicateEncounter(format!(
                "patient {} already has an active encounter today",
                new.patient_id
            )));
        }

        let id = Uuid::new_v4();
        let encounter_no = generate_encounter_no(today);
        let row = sqlx::query_as::<_, DbEncounter>(r#"
            INSERT INTO encounters (id, encounter_no, patient_id, facility_id, status,
                                    occurred_at, occurred_on, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'WAIT_TRIAGE', $5, $6, $5, $5)
            RETURNING *
        "#)
        .bind(id)
        .bind(&encounter_no)
        .bind(new.patient_id)
        .bind(new.facility_id)
        .bind(now)
        .bind(today)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ClinicError::DuplicateEncounter(format!(
                    "patient {} already has an active encounter today",
                    new.patient_id
                ))
            } else {
                ClinicError::Database(e.to_string())
            }
        })?;

        let entry =
            NewAuditEntry::new(actor, AuditAction::EncounterCreated, EntityType::Encounter, id)
                .with_metadata(json!({
                    "encounter_no": encounter_no,
                    "patient_id": new.patient_id,
                }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn claim_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Encounter> {
        let cutoff = now - ttl;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        // 接管过期租约时记下原持有人
        let previous = self.read_back(&mut tx, id).await?;

        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET claimed_by = $2, claimed_at = $3, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $4
              AND status = 'WAIT_TRIAGE'
              AND (claimed_by IS NULL OR claimed_by = $2 OR claimed_at <= $5)
            RETURNING *
        "#)
        .bind(id)
        .bind(worker.id)
        .bind(now)
        .bind(worker.facility_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        match updated {
            Some(row) => {
                let metadata = match previous.map(|p| p.lease().state(now, ttl)) {
                    Some(LeaseState::Expired { owner_id }) => {
                        json!({ "took_over_expired_from": owner_id })
                    }
                    Some(LeaseState::Live { owner_id }) if owner_id == worker.id => {
                        json!({ "renewed": true })
                    }
                    _ => serde_json::Value::Null,
                };
                let entry = NewAuditEntry::new(
                    worker,
                    AuditAction::TriageClaimed,
                    EntityType::Encounter,
                    id,
                )
                .with_metadata(metadata);
                self.insert_audit(&mut tx, entry, now).await?;
                tx.commit()
                    .await
                    .map_err(|e| ClinicError::Database(e.to_string()))?;
                Ok(row.into())
            }
            None => {
                // 0行：重读当前行分类，他人持有有效租约报 AlreadyClaimed，其余一律折叠
                if let Some(enc) = self.read_back(&mut tx, id).await? {
                    if enc.deleted_at.is_none()
                        && enc.facility_id == worker.facility_id
                        && enc.status == EncounterStatus::WaitTriage
                    {
                        if let LeaseState::Live { owner_id } = enc.lease().state(now, ttl) {
                            if owner_id != worker.id {
                                return Err(ClinicError::AlreadyClaimed(format!(
                                    "encounter {}",
                                    id
                                )));
                            }
                        }
                    }
                }
                Err(ClinicError::NotFound(format!("encounter {}", id)))
            }
        }
    }

    async fn release_triage(
        &self,
        id: Uuid,
        worker: &Actor,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Encounter> {
        let cutoff = now - ttl;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET claimed_by = NULL, claimed_at = NULL, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $4
              AND status = 'WAIT_TRIAGE'
              AND (claimed_by IS NULL OR claimed_by = $2 OR claimed_at <= $5)
            RETURNING *
        "#)
        .bind(id)
        .bind(worker.id)
        .bind(now)
        .bind(worker.facility_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        match updated {
            Some(row) => {
                let entry = NewAuditEntry::new(
                    worker,
                    AuditAction::TriageReleased,
                    EntityType::Encounter,
                    id,
                );
                self.insert_audit(&mut tx, entry, now).await?;
                tx.commit()
                    .await
                    .map_err(|e| ClinicError::Database(e.to_string()))?;
                Ok(row.into())
            }
            None => {
                // 0行：他人持有有效租约报 Forbidden，其余折叠为 NotFound
                if let Some(enc) = self.read_back(&mut tx, id).await? {
                    if enc.deleted_at.is_none()
                        && enc.facility_id == worker.facility_id
                        && enc.status == EncounterStatus::WaitTriage
                    {
                        if let LeaseState::Live { owner_id } = enc.lease().state(now, ttl) {
                            if owner_id != worker.id {
                                return Err(ClinicError::Forbidden(
                                    "lease is held by another worker".to_string(),
                                ));
                            }
                        }
                    }
                }
                Err(ClinicError::NotFound(format!("encounter {}", id)))
            }
        }
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
        let cutoff = now - ttl;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET status = 'TRIAGED', claimed_by = NULL, claimed_at = NULL,
                triage_by = $2, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $4
              AND status = 'WAIT_TRIAGE'
              AND (claimed_by IS NULL OR claimed_by = $2 OR claimed_at <= $5)
            RETURNING *
        "#)
        .bind(id)
        .bind(worker.id)
        .bind(now)
        .bind(worker.facility_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        // 提交分诊不区分占用原因，一律折叠为 NotFound
        if updated.is_none() {
            return Err(ClinicError::NotFound(format!("encounter {}", id)));
        }

        let record = sqlx::query_as::<_, DbTriageRecord>(r#"
            INSERT INTO triage_records (id, encounter_id, temperature_c, systolic_mmhg,
                                        diastolic_mmhg, pulse_bpm, respiratory_rate,
                                        weight_kg, height_cm, chief_complaint,
                                        screening_notes, triage_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (encounter_id) DO UPDATE SET
                temperature_c = EXCLUDED.temperature_c,
                systolic_mmhg = EXCLUDED.systolic_mmhg,
                diastolic_mmhg = EXCLUDED.diastolic_mmhg,
                pulse_bpm = EXCLUDED.pulse_bpm,
                respiratory_rate = EXCLUDED.respiratory_rate,
                weight_kg = EXCLUDED.weight_kg,
                height_cm = EXCLUDED.height_cm,
                chief_complaint = EXCLUDED.chief_complaint,
                screening_notes = EXCLUDED.screening_notes,
                triage_by = EXCLUDED.triage_by,
                updated_at = EXCLUDED.updated_at
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(input.temperature_c)
        .bind(input.systolic_mmhg)
        .bind(input.diastolic_mmhg)
        .bind(input.pulse_bpm)
        .bind(input.respiratory_rate)
        .bind(input.weight_kg)
        .bind(input.height_cm)
        .bind(&input.chief_complaint)
        .bind(&input.screening_notes)
        .bind(worker.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        let entry =
            NewAuditEntry::new(worker, AuditAction::TriageSubmitted, EntityType::Encounter, id)
                .with_metadata(json!({ "chief_complaint": input.chief_complaint }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(record.into())
    }

    async fn claim_doctor(&self, id: Uuid, doctor: &Actor, now: DateTime<Utc>) -> Result<Encounter> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        // 竞争失败者读到 0 行，与不存在、状态不符一并折叠为 NotFound
        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET status = 'WAIT_DOCTOR', doctor_id = $2, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $4
              AND status = 'TRIAGED' AND doctor_id IS NULL
            RETURNING *
        "#)
        .bind(id)
        .bind(doctor.id)
        .bind(now)
        .bind(doctor.facility_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        let row = updated.ok_or_else(|| ClinicError::NotFound(format!("encounter {}", id)))?;
        let entry =
            NewAuditEntry::new(doctor, AuditAction::DoctorClaimed, EntityType::Encounter, id);
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn start_consult(&self, id: Uuid, doctor: &Actor, now: DateTime<Utc>) -> Result<Encounter> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET status = 'IN_CONSULT', consult_started_at = $3, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $4
              AND status = 'WAIT_DOCTOR' AND doctor_id = $2
            RETURNING *
        "#)
        .bind(id)
        .bind(doctor.id)
        .bind(now)
        .bind(doctor.facility_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        let row = updated.ok_or_else(|| ClinicError::NotFound(format!("encounter {}", id)))?;
        let entry =
            NewAuditEntry::new(doctor, AuditAction::ConsultStarted, EntityType::Encounter, id);
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET status = $5, consult_ended_at = $3, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $4
              AND status = 'IN_CONSULT' AND doctor_id = $2
            RETURNING *
        "#)
        .bind(id)
        .bind(doctor.id)
        .bind(now)
        .bind(doctor.facility_id)
        .bind(status_to_str(next))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        let row = updated.ok_or_else(|| ClinicError::NotFound(format!("encounter {}", id)))?;

        // 完诊门槛在同一事务内重新点数；不达标时提前返回，事务随之回滚
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM diagnoses WHERE encounter_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        if count < 1 {
            return Err(ClinicError::Validation(
                "at least one active diagnosis is required to complete".to_string(),
            ));
        }

        let entry =
            NewAuditEntry::new(doctor, AuditAction::ConsultCompleted, EntityType::Encounter, id)
                .with_metadata(json!({ "next_status": next }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn cancel_encounter(
        &self,
        id: Uuid,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Encounter> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        // 取消前的状态进审计快照
        let previous = self.read_back(&mut tx, id).await?;

        let updated = sqlx::query_as::<_, DbEncounter>(r#"
            UPDATE encounters
            SET status = 'CANCELLED', claimed_by = NULL, claimed_at = NULL, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL AND facility_id = $2
              AND status NOT IN ('FOR_LAB', 'FOR_PHARMACY', 'DONE', 'CANCELLED')
            RETURNING *
        "#)
        .bind(id)
        .bind(actor.facility_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        let row = updated.ok_or_else(|| ClinicError::NotFound(format!("encounter {}", id)))?;
        let entry = NewAuditEntry::new(
            actor,
            AuditAction::EncounterCancelled,
            EntityType::Encounter,
            id,
        )
        .with_metadata(json!({
            "from_status": previous.map(|p| status_to_str(p.status)),
        }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    // ========== 临床内容 ==========

    async fn add_diagnosis(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: DiagnosisInput,
        now: DateTime<Utc>,
    ) -> Result<Diagnosis> {
        input.validate()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        self.consulting_encounter(&mut tx, encounter_id, doctor).await?;

        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DbDiagnosis>(r#"
            INSERT INTO diagnoses (id, encounter_id, code, description, doctor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        "#)
        .bind(id)
        .bind(encounter_id)
        .bind(&input.code)
        .bind(&input.description)
        .bind(doctor.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // 有效编码唯一性由部分索引裁决
            if is_unique_violation(&e) {
                ClinicError::DuplicateCode(input.code.clone())
            } else {
                ClinicError::Database(e.to_string())
            }
        })?;

        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::DiagnosisAdded,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({ "diagnosis_id": id, "code": input.code }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn remove_diagnosis(
        &self,
        diagnosis_id: Uuid,
        doctor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Diagnosis> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        let existing = sqlx::query_as::<_, DbDiagnosis>(
            "SELECT * FROM diagnoses WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(diagnosis_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?
        .ok_or_else(|| ClinicError::NotFound(format!("diagnosis {}", diagnosis_id)))?;

        self.consulting_encounter(&mut tx, existing.encounter_id, doctor)
            .await?;

        let row = sqlx::query_as::<_, DbDiagnosis>(r#"
            UPDATE diagnoses SET deleted_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
        "#)
        .bind(diagnosis_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?
        .ok_or_else(|| ClinicError::NotFound(format!("diagnosis {}", diagnosis_id)))?;

        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::DiagnosisRemoved,
            EntityType::Encounter,
            existing.encounter_id,
        )
        .with_metadata(json!({ "diagnosis_id": diagnosis_id, "code": existing.code }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn add_prescription(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: PrescriptionInput,
        now: DateTime<Utc>,
    ) -> Result<Prescription> {
        input.validate()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        self.consulting_encounter(&mut tx, encounter_id, doctor).await?;

        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DbPrescription>(r#"
            INSERT INTO prescriptions (id, encounter_id, doctor_id, medication, dose,
                                       frequency, days, quantity, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
        "#)
        .bind(id)
        .bind(encounter_id)
        .bind(doctor.id)
        .bind(&input.medication)
        .bind(&input.dose)
        .bind(&input.frequency)
        .bind(input.days)
        .bind(input.quantity)
        .bind(&input.notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::PrescriptionAdded,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({ "prescription_id": id, "medication": input.medication }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    async fn add_lab_order(
        &self,
        encounter_id: Uuid,
        doctor: &Actor,
        input: LabOrderInput,
        now: DateTime<Utc>,
    ) -> Result<LabOrder> {
        input.validate()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        self.consulting_encounter(&mut tx, encounter_id, doctor).await?;

        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DbLabOrder>(r#"
            INSERT INTO lab_orders (id, encounter_id, doctor_id, test_code, test_name,
                                    specimen, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
        "#)
        .bind(id)
        .bind(encounter_id)
        .bind(doctor.id)
        .bind(&input.test_code)
        .bind(&input.test_name)
        .bind(&input.specimen)
        .bind(&input.notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;

        let entry = NewAuditEntry::new(
            doctor,
            AuditAction::LabOrderAdded,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(json!({ "lab_order_id": id, "test_code": input.test_code }));
        self.insert_audit(&mut tx, entry, now).await?;
        tx.commit()
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;
        Ok(row.into())
    }

    // ========== 审计 ==========

    async fn audit_trail(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, DbAuditLog>(r#"
            SELECT * FROM audit_log
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY seq ASC
        "#)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ClinicError::Database(e.to_string()))?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }
}
