//! 核心数据模型定义

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 患者基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub patient_no: String, // 院内患者编号
    pub name: String,       // 患者姓名
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 性别枚举
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Other,
}

/// 新患者登记信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    pub patient_no: String,
    pub name: String,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
}

impl NewPatient {
    /// 登记前的结构校验
    pub fn validate(&self) -> crate::Result<()> {
        if self.patient_no.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "patient_no must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "patient name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 就诊状态
///
/// 持久化与接口层使用 SCREAMING_SNAKE 字符串形式（如 `WAIT_TRIAGE`）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncounterStatus {
    WaitTriage,  // 候诊（待分诊）
    Triaged,     // 已分诊
    WaitDoctor,  // 候医（已由医生领取）
    InConsult,   // 就诊中
    ForLab,      // 转检验
    ForPharmacy, // 转药房
    Done,        // 已完成
    Cancelled,   // 已取消
}

impl EncounterStatus {
    /// 是否为终态（检验/药房由下游模块接手，对本系统同样视为终态）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EncounterStatus::ForLab
                | EncounterStatus::ForPharmacy
                | EncounterStatus::Done
                | EncounterStatus::Cancelled
        )
    }

    /// 是否为可被分诊台认领的状态
    pub fn is_claimable(&self) -> bool {
        matches!(self, EncounterStatus::WaitTriage)
    }

    /// 就诊完成时允许的去向
    pub fn is_completion_target(&self) -> bool {
        matches!(
            self,
            EncounterStatus::ForLab | EncounterStatus::ForPharmacy | EncounterStatus::Done
        )
    }
}

/// 就诊记录：每位患者每次来诊一条，工作流状态的承载单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encounter {
    pub id: Uuid,
    pub encounter_no: String, // 就诊号
    pub patient_id: Uuid,
    pub facility_id: Uuid,
    pub status: EncounterStatus,
    pub occurred_at: DateTime<Utc>, // 来诊时间，队列先进先出的排序键
    pub claimed_by: Option<Uuid>,   // 租约持有人（分诊工作人员）
    pub claimed_at: Option<DateTime<Utc>>,
    pub triage_by: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub consult_started_at: Option<DateTime<Utc>>,
    pub consult_ended_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>, // 软删除标记，从不物理删除
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Encounter {
    /// 由可空的认领字段还原租约视图（存储边界上的转换）
    pub fn lease(&self) -> Lease {
        Lease::from_fields(self.claimed_by, self.claimed_at)
    }

    /// 来诊日期（UTC 日历日，当日队列与去重检查的口径）
    pub fn visit_date(&self) -> NaiveDate {
        self.occurred_at.date_naive()
    }

    /// 未取消且未删除
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.status != EncounterStatus::Cancelled
    }
}

/// 新就诊登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEncounter {
    pub patient_id: Uuid,
    pub facility_id: Uuid,
}

/// 租约：就诊记录上的限时独占标记
///
/// 内部以带标签的联合类型建模；持久化仍是就诊行上的两个可空列，
/// 在存储边界相互转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lease {
    /// 无人持有
    Free,
    /// 由某工作人员持有
    Held {
        owner_id: Uuid,
        acquired_at: DateTime<Utc>,
    },
}

impl Lease {
    /// 由可空列还原租约（两列必须同时存在才构成持有）
    pub fn from_fields(claimed_by: Option<Uuid>, claimed_at: Option<DateTime<Utc>>) -> Self {
        match (claimed_by, claimed_at) {
            (Some(owner_id), Some(acquired_at)) => Lease::Held {
                owner_id,
                acquired_at,
            },
            _ => Lease::Free,
        }
    }

    /// 当前持有人（不考虑是否过期）
    pub fn holder(&self) -> Option<Uuid> {
        match self {
            Lease::Free => None,
            Lease::Held { owner_id, .. } => Some(*owner_id),
        }
    }

    /// 相对给定时刻的租约状态
    ///
    /// 过期判定是纯粹的挂钟比较：过期租约在所有协调语义上等同于无租约，
    /// 但陈旧字段只在下一次写入时清除，没有后台清扫。
    pub fn state(&self, now: DateTime<Utc>, ttl: Duration) -> LeaseState {
        match self {
            Lease::Free => LeaseState::Free,
            Lease::Held {
                owner_id,
                acquired_at,
            } => {
                if now - *acquired_at >= ttl {
                    LeaseState::Expired {
                        owner_id: *owner_id,
                    }
                } else {
                    LeaseState::Live {
                        owner_id: *owner_id,
                    }
                }
            }
        }
    }
}

/// 结合时钟后的租约状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Free,
    Live { owner_id: Uuid },
    Expired { owner_id: Uuid },
}

/// 分诊记录：与就诊一对一，提交分诊时插入或更新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRecord {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub temperature_c: Option<f64>,
    pub systolic_mmhg: Option<i32>,
    pub diastolic_mmhg: Option<i32>,
    pub pulse_bpm: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub chief_complaint: String, // 主诉
    pub screening_notes: Option<String>,
    pub triage_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 分诊提交内容（生命体征 + 问询）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageInput {
    pub temperature_c: Option<f64>,
    pub systolic_mmhg: Option<i32>,
    pub diastolic_mmhg: Option<i32>,
    pub pulse_bpm: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub chief_complaint: String,
    pub screening_notes: Option<String>,
}

impl TriageInput {
    /// 提交前的结构校验，范围取临床可信区间
    pub fn validate(&self) -> crate::Result<()> {
        if self.chief_complaint.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "chief complaint must not be empty".to_string(),
            ));
        }
        if let Some(t) = self.temperature_c {
            if !(30.0..=45.0).contains(&t) {
                return Err(crate::ClinicError::Validation(format!(
                    "temperature out of range: {}",
                    t
                )));
            }
        }
        if let Some(s) = self.systolic_mmhg {
            if !(50..=300).contains(&s) {
                return Err(crate::ClinicError::Validation(format!(
                    "systolic pressure out of range: {}",
                    s
                )));
            }
        }
        if let Some(d) = self.diastolic_mmhg {
            if !(20..=200).contains(&d) {
                return Err(crate::ClinicError::Validation(format!(
                    "diastolic pressure out of range: {}",
                    d
                )));
            }
        }
        if let Some(p) = self.pulse_bpm {
            if !(20..=300).contains(&p) {
                return Err(crate::ClinicError::Validation(format!(
                    "pulse out of range: {}",
                    p
                )));
            }
        }
        if let Some(r) = self.respiratory_rate {
            if !(4..=80).contains(&r) {
                return Err(crate::ClinicError::Validation(format!(
                    "respiratory rate out of range: {}",
                    r
                )));
            }
        }
        if let Some(w) = self.weight_kg {
            if !(0.3..=500.0).contains(&w) {
                return Err(crate::ClinicError::Validation(format!(
                    "weight out of range: {}",
                    w
                )));
            }
        }
        if let Some(h) = self.height_cm {
            if !(20.0..=280.0).contains(&h) {
                return Err(crate::ClinicError::Validation(format!(
                    "height out of range: {}",
                    h
                )));
            }
        }
        Ok(())
    }
}

/// 诊断条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub code: String, // 诊断编码，同一就诊内有效条目不重复
    pub description: String,
    pub doctor_id: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Diagnosis {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// 诊断录入内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisInput {
    pub code: String,
    pub description: String,
}

impl DiagnosisInput {
    pub fn validate(&self) -> crate::Result<()> {
        if self.code.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "diagnosis code must not be empty".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "diagnosis description must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 处方条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub doctor_id: Uuid,
    pub medication: String,
    pub dose: String,      // 如 "500mg"
    pub frequency: String, // 如 "tid"
    pub days: i32,
    pub quantity: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 处方录入内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionInput {
    pub medication: String,
    pub dose: String,
    pub frequency: String,
    pub days: i32,
    pub quantity: i32,
    pub notes: Option<String>,
}

impl PrescriptionInput {
    pub fn validate(&self) -> crate::Result<()> {
        if self.medication.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "medication must not be empty".to_string(),
            ));
        }
        if self.days <= 0 || self.quantity <= 0 {
            return Err(crate::ClinicError::Validation(
                "days and quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// 检验申请单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabOrder {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub doctor_id: Uuid,
    pub test_code: String,
    pub test_name: String,
    pub specimen: Option<String>, // 标本类型
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 检验申请录入内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabOrderInput {
    pub test_code: String,
    pub test_name: String,
    pub specimen: Option<String>,
    pub notes: Option<String>,
}

impl LabOrderInput {
    pub fn validate(&self) -> crate::Result<()> {
        if self.test_code.trim().is_empty() || self.test_name.trim().is_empty() {
            return Err(crate::ClinicError::Validation(
                "test code and name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 操作者角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActorRole {
    /// 挂号员 - 登记就诊
    Registration,
    /// 护士 - 分诊台操作
    Nurse,
    /// 医生 - 接诊与完成就诊
    Doctor,
    /// 管理员 - 完全访问权限
    Admin,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Registration => "registration",
            ActorRole::Nurse => "nurse",
            ActorRole::Doctor => "doctor",
            ActorRole::Admin => "admin",
        }
    }
}

/// 操作者身份
///
/// 每次门面调用都显式传入，不依赖任何环境会话状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub role: ActorRole,
    pub facility_id: Uuid,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: ActorRole, facility_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            facility_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_from_fields() {
        let now = Utc::now();
        let owner = Uuid::new_v4();

        assert_eq!(Lease::from_fields(None, None), Lease::Free);
        // 只有单列存在时视为无租约
        assert_eq!(Lease::from_fields(Some(owner), None), Lease::Free);
        assert_eq!(Lease::from_fields(None, Some(now)), Lease::Free);
        assert_eq!(
            Lease::from_fields(Some(owner), Some(now)),
            Lease::Held {
                owner_id: owner,
                acquired_at: now
            }
        );
    }

    #[test]
    fn test_lease_state_expiry() {
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let ttl = Duration::minutes(15);

        let live = Lease::Held {
            owner_id: owner,
            acquired_at: now - Duration::minutes(14),
        };
        assert_eq!(live.state(now, ttl), LeaseState::Live { owner_id: owner });

        // 恰好达到 TTL 即视为过期
        let boundary = Lease::Held {
            owner_id: owner,
            acquired_at: now - Duration::minutes(15),
        };
        assert_eq!(
            boundary.state(now, ttl),
            LeaseState::Expired { owner_id: owner }
        );

        assert_eq!(Lease::Free.state(now, ttl), LeaseState::Free);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!EncounterStatus::WaitTriage.is_terminal());
        assert!(!EncounterStatus::InConsult.is_terminal());
        assert!(EncounterStatus::ForLab.is_terminal());
        assert!(EncounterStatus::Done.is_terminal());
        assert!(EncounterStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        // 接口层使用 SCREAMING_SNAKE 形式
        let json = serde_json::to_string(&EncounterStatus::WaitTriage).unwrap();
        assert_eq!(json, "\"WAIT_TRIAGE\"");
        let back: EncounterStatus = serde_json::from_str("\"FOR_PHARMACY\"").unwrap();
        assert_eq!(back, EncounterStatus::ForPharmacy);
    }

    #[test]
    fn test_triage_input_validation() {
        let mut input = TriageInput {
            chief_complaint: "头痛三天".to_string(),
            temperature_c: Some(37.2),
            ..Default::default()
        };
        assert!(input.validate().is_ok());

        input.temperature_c = Some(50.0);
        assert!(input.validate().is_err());

        input.temperature_c = Some(36.5);
        input.chief_complaint = "  ".to_string();
        assert!(input.validate().is_err());
    }
}
