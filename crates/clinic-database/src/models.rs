//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use clinic_core::audit::{AuditAction, AuditLogEntry, EntityType};
use clinic_core::models::*;
use clinic_core::ClinicError;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 状态列的持久化字符串形式
pub fn status_to_str(status: EncounterStatus) -> &'static str {
    match status {
        EncounterStatus::WaitTriage => "WAIT_TRIAGE",
        EncounterStatus::Triaged => "TRIAGED",
        EncounterStatus::WaitDoctor => "WAIT_DOCTOR",
        EncounterStatus::InConsult => "IN_CONSULT",
        EncounterStatus::ForLab => "FOR_LAB",
        EncounterStatus::ForPharmacy => "FOR_PHARMACY",
        EncounterStatus::Done => "DONE",
        EncounterStatus::Cancelled => "CANCELLED",
    }
}

pub fn status_from_str(s: &str) -> EncounterStatus {
    match s {
        "WAIT_TRIAGE" => EncounterStatus::WaitTriage,
        "TRIAGED" => EncounterStatus::Triaged,
        "WAIT_DOCTOR" => EncounterStatus::WaitDoctor,
        "IN_CONSULT" => EncounterStatus::InConsult,
        "FOR_LAB" => EncounterStatus::ForLab,
        "FOR_PHARMACY" => EncounterStatus::ForPharmacy,
        "DONE" => EncounterStatus::Done,
        "CANCELLED" => EncounterStatus::Cancelled,
        _ => EncounterStatus::WaitTriage, // 默认状态
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub patient_no: String,
    pub name: String,
    pub sex: Option<String>, // 存储为字符串，转换为Sex枚举
    pub birth_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db: DbPatient) -> Self {
        Patient {
            id: db.id,
            patient_no: db.patient_no,
            name: db.name,
            sex: db.sex.and_then(|s| match s.as_str() {
                "M" => Some(Sex::Male),
                "F" => Some(Sex::Female),
                "O" => Some(Sex::Other),
                _ => None,
            }),
            birth_date: db.birth_date,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

pub fn sex_to_str(sex: &Sex) -> &'static str {
    match sex {
        Sex::Male => "M",
        Sex::Female => "F",
        Sex::Other => "O",
    }
}

/// 数据库就诊表
#[derive(Debug, FromRow)]
pub struct DbEncounter {
    pub id: Uuid,
    pub encounter_no: String,
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub status: String, // 存储为字符串，转换为EncounterStatus枚举
    pub occurred_at: DateTime<Utc>,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub triage_by: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub consult_started_at: Option<DateTime<Utc>>,
    pub consult_ended_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbEncounter> for Encounter {
    fn from(db: DbEncounter) -> Self {
        Encounter {
            id: db.id,
            encounter_no: db.encounter_no,
            patient_id: db.patient_id,
            facility_id: db.facility_id,
            status: status_from_str(&db.status),
            occurred_at: db.occurred_at,
            claimed_by: db.claimed_by,
            claimed_at: db.claimed_at,
            triage_by: db.triage_by,
            doctor_id: db.doctor_id,
            consult_started_at: db.consult_started_at,
            consult_ended_at: db.consult_ended_at,
            deleted_at: db.deleted_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// 数据库分诊记录表
#[derive(Debug, FromRow)]
pub struct DbTriageRecord {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub temperature_c: Option<f64>,
    pub systolic_mmhg: Option<i32>,
    pub diastolic_mmhg: Option<i32>,
    pub pulse_bpm: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub chief_complaint: String,
    pub screening_notes: Option<String>,
    pub triage_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbTriageRecord> for TriageRecord {
    fn from(db: DbTriageRecord) -> Self {
        TriageRecord {
            id: db.id,
            encounter_id: db.encounter_id,
            temperature_c: db.temperature_c,
            systolic_mmhg: db.systolic_mmhg,
            diastolic_mmhg: db.diastolic_mmhg,
            pulse_bpm: db.pulse_bpm,
            respiratory_rate: db.respiratory_rate,
            weight_kg: db.weight_kg,
            height_cm: db.height_cm,
            chief_complaint: db.chief_complaint,
            screening_notes: db.screening_notes,
            triage_by: db.triage_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// 数据库诊断表
#[derive(Debug, FromRow)]
pub struct DbDiagnosis {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub code: String,
    pub description: String,
    pub doctor_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbDiagnosis> for Diagnosis {
    fn from(db: DbDiagnosis) -> Self {
        Diagnosis {
            id: db.id,
            encounter_id: db.encounter_id,
            code: db.code,
            description: db.description,
            doctor_id: db.doctor_id,
            deleted_at: db.deleted_at,
            created_at: db.created_at,
        }
    }
}

/// 数据库处方表
#[derive(Debug, FromRow)]
pub struct DbPrescription {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub doctor_id: Uuid,
    pub medication: String,
    pub dose: String,
    pub frequency: String,
    pub days: i32,
    pub quantity: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbPrescription> for Prescription {
    fn from(db: DbPrescription) -> Self {
        Prescription {
            id: db.id,
            encounter_id: db.encounter_id,
            doctor_id: db.doctor_id,
            medication: db.medication,
            dose: db.dose,
            frequency: db.frequency,
            days: db.days,
            quantity: db.quantity,
            notes: db.notes,
            created_at: db.created_at,
        }
    }
}

/// 数据库检验申请表
#[derive(Debug, FromRow)]
pub struct DbLabOrder {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub doctor_id: Uuid,
    pub test_code: String,
    pub test_name: String,
    pub specimen: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbLabOrder> for LabOrder {
    fn from(db: DbLabOrder) -> Self {
        LabOrder {
            id: db.id,
            encounter_id: db.encounter_id,
            doctor_id: db.doctor_id,
            test_code: db.test_code,
            test_name: db.test_name,
            specimen: db.specimen,
            notes: db.notes,
            created_at: db.created_at,
        }
    }
}

/// 数据库审计日志表
///
/// `seq` 仅用于稳定排序，不进入领域模型。
#[derive(Debug, FromRow)]
pub struct DbAuditLog {
    pub seq: i64,
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_name: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbAuditLog> for AuditLogEntry {
    type Error = ClinicError;

    // 审计动作不允许悄悄回退到默认值，未知字符串视为数据损坏
    fn try_from(db: DbAuditLog) -> Result<Self, Self::Error> {
        let action = AuditAction::from_str(&db.action)
            .ok_or_else(|| ClinicError::Database(format!("unknown audit action: {}", db.action)))?;
        let entity_type = EntityType::from_str(&db.entity_type).ok_or_else(|| {
            ClinicError::Database(format!("unknown audit entity type: {}", db.entity_type))
        })?;
        Ok(AuditLogEntry {
            id: db.id,
            actor_id: db.actor_id,
            actor_name: db.actor_name,
            action,
            entity_type,
            entity_id: db.entity_id,
            metadata: db.metadata,
            created_at: db.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_str_round_trip() {
        for status in [
            EncounterStatus::WaitTriage,
            EncounterStatus::Triaged,
            EncounterStatus::WaitDoctor,
            EncounterStatus::InConsult,
            EncounterStatus::ForLab,
            EncounterStatus::ForPharmacy,
            EncounterStatus::Done,
            EncounterStatus::Cancelled,
        ] {
            assert_eq!(status_from_str(status_to_str(status)), status);
        }
    }

    #[test]
    fn test_db_encounter_conversion() {
        let now = Utc::now();
        let db = DbEncounter {
            id: Uuid::new_v4(),
            encounter_no: "E20250825-1a2b3c4d".to_string(),
            patient_id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            status: "WAIT_TRIAGE".to_string(),
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
        let encounter = Encounter::from(db);
        assert_eq!(encounter.status, EncounterStatus::WaitTriage);
        assert_eq!(encounter.lease(), Lease::Free);
    }

    #[test]
    fn test_audit_conversion_rejects_unknown_action() {
        let now = Utc::now();
        let db = DbAuditLog {
            seq: 1,
            id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            actor_name: "护士小王".to_string(),
            action: "NOT_A_REAL_ACTION".to_string(),
            entity_type: "ENCOUNTER".to_string(),
            entity_id: Uuid::new_v4(),
            metadata: serde_json::Value::Null,
            created_at: now,
        };
        assert!(AuditLogEntry::try_from(db).is_err());
    }
}
