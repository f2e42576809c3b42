//! 就诊状态机
//!
//! 管理就诊记录的完整生命周期状态转换

use clinic_core::{ClinicError, EncounterStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 就诊状态转换事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EncounterEvent {
    SubmitTriage,
    ClaimByDoctor,
    StartConsult,
    RouteToLab,
    RouteToPharmacy,
    Finish,
    Cancel,
}

/// 就诊状态机
#[derive(Debug)]
pub struct EncounterStateMachine {
    transitions: HashMap<(EncounterStatus, EncounterEvent), EncounterStatus>,
}

impl EncounterStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert(
            (EncounterStatus::WaitTriage, EncounterEvent::SubmitTriage),
            EncounterStatus::Triaged,
        );
        transitions.insert(
            (EncounterStatus::Triaged, EncounterEvent::ClaimByDoctor),
            EncounterStatus::WaitDoctor,
        );
        transitions.insert(
            (EncounterStatus::WaitDoctor, EncounterEvent::StartConsult),
            EncounterStatus::InConsult,
        );
        transitions.insert(
            (EncounterStatus::InConsult, EncounterEvent::RouteToLab),
            EncounterStatus::ForLab,
        );
        transitions.insert(
            (EncounterStatus::InConsult, EncounterEvent::RouteToPharmacy),
            EncounterStatus::ForPharmacy,
        );
        transitions.insert(
            (EncounterStatus::InConsult, EncounterEvent::Finish),
            EncounterStatus::Done,
        );

        // 任何非终态都可以取消
        for status in Self::get_all_states() {
            if !status.is_terminal() {
                transitions.insert((status, EncounterEvent::Cancel), EncounterStatus::Cancelled);
            }
        }

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: &EncounterStatus, event: &EncounterEvent) -> bool {
        self.transitions.contains_key(&(*from, event.clone()))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &EncounterStatus, event: &EncounterEvent) -> Result<EncounterStatus> {
        match self.transitions.get(&(*from, event.clone())) {
            Some(to) => Ok(*to),
            None => Err(ClinicError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            }),
        }
    }

    /// 完诊目标状态对应的事件
    pub fn completion_event(next: &EncounterStatus) -> Option<EncounterEvent> {
        match next {
            EncounterStatus::ForLab => Some(EncounterEvent::RouteToLab),
            EncounterStatus::ForPharmacy => Some(EncounterEvent::RouteToPharmacy),
            EncounterStatus::Done => Some(EncounterEvent::Finish),
            _ => None,
        }
    }

    /// 获取所有可能的状态
    pub fn get_all_states() -> Vec<EncounterStatus> {
        vec![
            EncounterStatus::WaitTriage,
            EncounterStatus::Triaged,
            EncounterStatus::WaitDoctor,
            EncounterStatus::InConsult,
            EncounterStatus::ForLab,
            EncounterStatus::ForPharmacy,
            EncounterStatus::Done,
            EncounterStatus::Cancelled,
        ]
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current_state: &EncounterStatus) -> Vec<EncounterEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| state == current_state)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Default for EncounterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
