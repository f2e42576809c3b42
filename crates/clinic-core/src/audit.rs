//! 审计日志模型
//!
//! 每一次变更操作在同一事务内追加一条不可变审计条目；
//! 审计写入失败将中止整个事务（审计丢失等同于变更未发生）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Actor;

/// 审计动作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    EncounterCreated,
    TriageClaimed,
    TriageReleased,
    TriageSubmitted,
    DoctorClaimed,
    ConsultStarted,
    ConsultCompleted,
    EncounterCancelled,
    DiagnosisAdded,
    DiagnosisRemoved,
    PrescriptionAdded,
    LabOrderAdded,
    PatientRegistered,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EncounterCreated => "ENCOUNTER_CREATED",
            AuditAction::TriageClaimed => "TRIAGE_CLAIMED",
            AuditAction::TriageReleased => "TRIAGE_RELEASED",
            AuditAction::TriageSubmitted => "TRIAGE_SUBMITTED",
            AuditAction::DoctorClaimed => "DOCTOR_CLAIMED",
            AuditAction::ConsultStarted => "CONSULT_STARTED",
            AuditAction::ConsultCompleted => "CONSULT_COMPLETED",
            AuditAction::EncounterCancelled => "ENCOUNTER_CANCELLED",
            AuditAction::DiagnosisAdded => "DIAGNOSIS_ADDED",
            AuditAction::DiagnosisRemoved => "DIAGNOSIS_REMOVED",
            AuditAction::PrescriptionAdded => "PRESCRIPTION_ADDED",
            AuditAction::LabOrderAdded => "LAB_ORDER_ADDED",
            AuditAction::PatientRegistered => "PATIENT_REGISTERED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ENCOUNTER_CREATED" => Some(AuditAction::EncounterCreated),
            "TRIAGE_CLAIMED" => Some(AuditAction::TriageClaimed),
            "TRIAGE_RELEASED" => Some(AuditAction::TriageReleased),
            "TRIAGE_SUBMITTED" => Some(AuditAction::TriageSubmitted),
            "DOCTOR_CLAIMED" => Some(AuditAction::DoctorClaimed),
            "CONSULT_STARTED" => Some(AuditAction::ConsultStarted),
            "CONSULT_COMPLETED" => Some(AuditAction::ConsultCompleted),
            "ENCOUNTER_CANCELLED" => Some(AuditAction::EncounterCancelled),
            "DIAGNOSIS_ADDED" => Some(AuditAction::DiagnosisAdded),
            "DIAGNOSIS_REMOVED" => Some(AuditAction::DiagnosisRemoved),
            "PRESCRIPTION_ADDED" => Some(AuditAction::PrescriptionAdded),
            "LAB_ORDER_ADDED" => Some(AuditAction::LabOrderAdded),
            "PATIENT_REGISTERED" => Some(AuditAction::PatientRegistered),
            _ => None,
        }
    }
}

/// 被审计实体的类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntityType {
    Encounter,
    TriageRecord,
    Diagnosis,
    Prescription,
    LabOrder,
    Patient,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Encounter => "ENCOUNTER",
            EntityType::TriageRecord => "TRIAGE_RECORD",
            EntityType::Diagnosis => "DIAGNOSIS",
            EntityType::Prescription => "PRESCRIPTION",
            EntityType::LabOrder => "LAB_ORDER",
            EntityType::Patient => "PATIENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ENCOUNTER" => Some(EntityType::Encounter),
            "TRIAGE_RECORD" => Some(EntityType::TriageRecord),
            "DIAGNOSIS" => Some(EntityType::Diagnosis),
            "PRESCRIPTION" => Some(EntityType::Prescription),
            "LAB_ORDER" => Some(EntityType::LabOrder),
            "PATIENT" => Some(EntityType::Patient),
            _ => None,
        }
    }
}

/// 审计日志条目：只追加，从不更新或删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_name: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub metadata: Value, // 变更前后上下文的结构化快照
    pub created_at: DateTime<Utc>,
}

/// 待写入的审计条目
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Uuid,
    pub actor_name: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub metadata: Value,
}

impl NewAuditEntry {
    pub fn new(actor: &Actor, action: AuditAction, entity_type: EntityType, entity_id: Uuid) -> Self {
        Self {
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            action,
            entity_type,
            entity_id,
            metadata: Value::Null,
        }
    }

    /// 附加结构化快照
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_entry(self, now: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::new_v4(),
            actor_id: self.actor_id,
            actor_name: self.actor_name,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            metadata: self.metadata,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorRole;

    #[test]
    fn test_action_str_round_trip() {
        let actions = [
            AuditAction::EncounterCreated,
            AuditAction::TriageClaimed,
            AuditAction::TriageReleased,
            AuditAction::TriageSubmitted,
            AuditAction::DoctorClaimed,
            AuditAction::ConsultStarted,
            AuditAction::ConsultCompleted,
            AuditAction::EncounterCancelled,
            AuditAction::DiagnosisAdded,
            AuditAction::DiagnosisRemoved,
            AuditAction::PrescriptionAdded,
            AuditAction::LabOrderAdded,
            AuditAction::PatientRegistered,
        ];
        for action in actions {
            assert_eq!(AuditAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::from_str("UNKNOWN"), None);
    }

    #[test]
    fn test_new_entry_builder() {
        let actor = Actor::new("护士小王", ActorRole::Nurse, Uuid::new_v4());
        let encounter_id = Uuid::new_v4();
        let entry = NewAuditEntry::new(
            &actor,
            AuditAction::TriageClaimed,
            EntityType::Encounter,
            encounter_id,
        )
        .with_metadata(serde_json::json!({ "status": "WAIT_TRIAGE" }))
        .into_entry(chrono::Utc::now());

        assert_eq!(entry.actor_id, actor.id);
        assert_eq!(entry.entity_id, encounter_id);
        assert_eq!(entry.metadata["status"], "WAIT_TRIAGE");
    }
}
