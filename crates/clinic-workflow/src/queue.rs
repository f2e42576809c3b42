//! 队列策略
//!
//! 为不同角色的查看者计算队列中每条就诊的可操作状态。
//! 分诊队列执行严格的先到先分诊：同一时刻每人至多认领一条，
//! 且只能认领最靠前的未被占用条目；医生队列无先后约束。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinic_core::{Encounter, EncounterStatus, LeaseState};

/// 队列种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// 分诊队列（护士）
    Triage,
    /// 候诊队列（医生）
    Doctor,
}

impl QueueKind {
    /// 进入该队列的就诊状态集合
    pub fn entry_statuses(&self) -> &'static [EncounterStatus] {
        match self {
            QueueKind::Triage => &[EncounterStatus::WaitTriage],
            QueueKind::Doctor => &[EncounterStatus::Triaged, EncounterStatus::WaitDoctor],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Triage => "triage",
            QueueKind::Doctor => "doctor",
        }
    }
}

/// 查看者视角下单条就诊的可操作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemState {
    /// 本人已认领
    Selected,
    /// 可以认领
    Available,
    /// 他人正在处理
    ClaimedByOther,
    /// 暂不可认领（排序靠后，或本人已另有认领）
    Disabled,
}

/// 带可操作状态的队列条目
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub encounter: Encounter,
    pub state: QueueItemState,
}

/// 队列策略
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    ttl: Duration,
}

impl QueuePolicy {
    /// 创建使用指定租约时长的队列策略
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// 标注整条队列：输入为某机构当日处于入队状态的就诊快照
    pub fn annotate(
        &self,
        kind: QueueKind,
        mut items: Vec<Encounter>,
        viewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Vec<QueueItem> {
        // 先到先服务：按来诊时间升序
        items.sort_by_key(|e| (e.occurred_at, e.id));

        match kind {
            QueueKind::Triage => self.annotate_triage(items, viewer_id, now),
            QueueKind::Doctor => self.annotate_doctor(items, viewer_id),
        }
    }

    /// 目标条目在查看者视角下的状态；不在队列中返回 None
    pub fn item_state(
        &self,
        kind: QueueKind,
        items: Vec<Encounter>,
        target_id: Uuid,
        viewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<QueueItemState> {
        self.annotate(kind, items, viewer_id, now)
            .into_iter()
            .find(|item| item.encounter.id == target_id)
            .map(|item| item.state)
    }

    fn annotate_triage(
        &self,
        items: Vec<Encounter>,
        viewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Vec<QueueItem> {
        // 查看者已持有有效租约：本条 Selected，其余一律 Disabled
        let holding = items.iter().any(|e| {
            matches!(e.lease().state(now, self.ttl),
                LeaseState::Live { owner_id } if owner_id == viewer_id)
        });
        if holding {
            return items
                .into_iter()
                .map(|e| {
                    let state = match e.lease().state(now, self.ttl) {
                        LeaseState::Live { owner_id } if owner_id == viewer_id => {
                            QueueItemState::Selected
                        }
                        _ => QueueItemState::Disabled,
                    };
                    QueueItem { encounter: e, state }
                })
                .collect();
        }

        // 未持有：顺序扫描，跳过他人占用的条目，第一条空闲的可认领，其余禁用
        let mut first_open_taken = false;
        items
            .into_iter()
            .map(|e| {
                let state = match e.lease().state(now, self.ttl) {
                    LeaseState::Live { .. } => QueueItemState::ClaimedByOther,
                    LeaseState::Free | LeaseState::Expired { .. } => {
                        if first_open_taken {
                            QueueItemState::Disabled
                        } else {
                            first_open_taken = true;
                            QueueItemState::Available
                        }
                    }
                };
                QueueItem { encounter: e, state }
            })
            .collect()
    }

    fn annotate_doctor(&self, items: Vec<Encounter>, viewer_id: Uuid) -> Vec<QueueItem> {
        // 医生队列无先后约束：已分诊的随时可领，已被领取的按归属标注
        items
            .into_iter()
            .map(|e| {
                let state = match e.status {
                    EncounterStatus::WaitDoctor => match e.doctor_id {
                        Some(d) if d == viewer_id => QueueItemState::Selected,
                        Some(_) => QueueItemState::ClaimedByOther,
                        None => QueueItemState::Available,
                    },
                    _ => QueueItemState::Available,
                };
                QueueItem { encounter: e, state }
            })
            .collect()
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::new(Duration::minutes(crate::lease::DEFAULT_LEASE_TTL_MINUTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encounter_at(minute: u32, status: EncounterStatus) -> Encounter {
        let base = Utc.with_ymd_and_hms(2025, 8, 25, 8, minute, 0).unwrap();
        Encounter {
            id: Uuid::new_v4(),
            encounter_no: format!("E20250825-{:08x}", minute),
            patient_id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            status,
            occurred_at: base,
            claimed_by: None,
            claimed_at: None,
            triage_by: None,
            doctor_id: None,
            consult_started_at: None,
            consult_ended_at: None,
            deleted_at: None,
            created_at: base,
            updated_at: base,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 25, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_triage_only_head_is_available() {
        let policy = QueuePolicy::default();
        let nurse = Uuid::new_v4();
        let items = vec![
            encounter_at(0, EncounterStatus::WaitTriage),
            encounter_at(1, EncounterStatus::WaitTriage),
            encounter_at(2, EncounterStatus::WaitTriage),
        ];

        let annotated = policy.annotate(QueueKind::Triage, items, nurse, now());
        let states: Vec<_> = annotated.iter().map(|i| i.state).collect();
        assert_eq!(
            states,
            vec![
                QueueItemState::Available,
                QueueItemState::Disabled,
                QueueItemState::Disabled,
            ]
        );
    }

    #[test]
    fn test_triage_claimed_head_unblocks_next() {
        let policy = QueuePolicy::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut head = encounter_at(0, EncounterStatus::WaitTriage);
        head.claimed_by = Some(alice);
        head.claimed_at = Some(now() - Duration::minutes(3));
        let items = vec![
            head,
            encounter_at(1, EncounterStatus::WaitTriage),
            encounter_at(2, EncounterStatus::WaitTriage),
        ];

        // Bob 视角：队首被 Alice 占用，第二条成为可认领，第三条仍禁用
        let annotated = policy.annotate(QueueKind::Triage, items, bob, now());
        let states: Vec<_> = annotated.iter().map(|i| i.state).collect();
        assert_eq!(
            states,
            vec![
                QueueItemState::ClaimedByOther,
                QueueItemState::Available,
                QueueItemState::Disabled,
            ]
        );
    }

    #[test]
    fn test_triage_holder_sees_own_selected_rest_disabled() {
        let policy = QueuePolicy::default();
        let alice = Uuid::new_v4();
        let mut second = encounter_at(1, EncounterStatus::WaitTriage);
        second.claimed_by = Some(alice);
        second.claimed_at = Some(now() - Duration::minutes(2));
        let items = vec![
            encounter_at(0, EncounterStatus::WaitTriage),
            second,
            encounter_at(2, EncounterStatus::WaitTriage),
        ];

        // 已持有认领的人不能再领第二条，哪怕队首空闲
        let annotated = policy.annotate(QueueKind::Triage, items, alice, now());
        let states: Vec<_> = annotated.iter().map(|i| i.state).collect();
        assert_eq!(
            states,
            vec![
                QueueItemState::Disabled,
                QueueItemState::Selected,
                QueueItemState::Disabled,
            ]
        );
    }

    #[test]
    fn test_triage_expired_lease_reopens_item() {
        let policy = QueuePolicy::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut head = encounter_at(0, EncounterStatus::WaitTriage);
        head.claimed_by = Some(alice);
        head.claimed_at = Some(now() - Duration::minutes(20));
        let items = vec![head, encounter_at(1, EncounterStatus::WaitTriage)];

        // 过期租约等同于空闲：队首重新可认领
        let annotated = policy.annotate(QueueKind::Triage, items, bob, now());
        assert_eq!(annotated[0].state, QueueItemState::Available);
        assert_eq!(annotated[1].state, QueueItemState::Disabled);
    }

    #[test]
    fn test_triage_expired_holder_loses_selection() {
        let policy = QueuePolicy::default();
        let alice = Uuid::new_v4();
        let mut head = encounter_at(0, EncounterStatus::WaitTriage);
        head.claimed_by = Some(alice);
        head.claimed_at = Some(now() - Duration::minutes(20));
        let items = vec![head];

        // 租约过期后本人视角回到 Available，需要重新认领
        let annotated = policy.annotate(QueueKind::Triage, items, alice, now());
        assert_eq!(annotated[0].state, QueueItemState::Available);
    }

    #[test]
    fn test_doctor_queue_is_loose() {
        let policy = QueuePolicy::default();
        let dr_wang = Uuid::new_v4();
        let dr_li = Uuid::new_v4();
        let mut mine = encounter_at(1, EncounterStatus::WaitDoctor);
        mine.doctor_id = Some(dr_wang);
        let mut other = encounter_at(2, EncounterStatus::WaitDoctor);
        other.doctor_id = Some(dr_li);
        let items = vec![
            encounter_at(0, EncounterStatus::Triaged),
            mine,
            other,
            encounter_at(3, EncounterStatus::Triaged),
        ];

        let annotated = policy.annotate(QueueKind::Doctor, items, dr_wang, now());
        let states: Vec<_> = annotated.iter().map(|i| i.state).collect();
        // 已分诊的条目全部可领，没有先后禁用
        assert_eq!(
            states,
            vec![
                QueueItemState::Available,
                QueueItemState::Selected,
                QueueItemState::ClaimedByOther,
                QueueItemState::Available,
            ]
        );
    }

    #[test]
    fn test_item_state_lookup() {
        let policy = QueuePolicy::default();
        let nurse = Uuid::new_v4();
        let first = encounter_at(0, EncounterStatus::WaitTriage);
        let second = encounter_at(1, EncounterStatus::WaitTriage);
        let second_id = second.id;
        let items = vec![first, second];

        assert_eq!(
            policy.item_state(QueueKind::Triage, items.clone(), second_id, nurse, now()),
            Some(QueueItemState::Disabled)
        );
        assert_eq!(
            policy.item_state(QueueKind::Triage, items, Uuid::new_v4(), nurse, now()),
            None
        );
    }
}
