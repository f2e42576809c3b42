//! 分诊队列策略演示
//!
//! 直接驱动队列标注逻辑：严格先进先出（禁止跳号）、同时只持有一条、
//! 以及租约到期后任何护士可接管。时间全部取固定值，便于对照输出。

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use clinic_core::{Encounter, EncounterStatus};
use clinic_workflow::{QueueItem, QueueItemState, QueueKind, QueuePolicy};

fn main() {
    println!("📋 分诊队列先进先出策略演示\n");

    let policy = QueuePolicy::default();
    let nurse_a = Uuid::new_v4();
    let nurse_b = Uuid::new_v4();
    // 四位患者按 09:00 / 09:05 / 09:10 / 09:15 到达，当前时刻 09:20
    let now = Utc.with_ymd_and_hms(2025, 8, 25, 9, 20, 0).unwrap();

    // 场景一：无人认领，只有队首开放
    let items = policy.annotate(
        QueueKind::Triage,
        fresh_queue(&[None, None, None, None]),
        nurse_a,
        now,
    );
    render("1️⃣  无人认领时（护士甲视角）:", &items);
    println!("    → 只有队首可认领，后面的条目全部封锁（禁止跳号）\n");

    // 场景二：队首被乙持有（09:18 认领，租约仍然有效）
    let held = Some((nurse_b, at(9, 18)));
    let items = policy.annotate(
        QueueKind::Triage,
        fresh_queue(&[held, None, None, None]),
        nurse_a,
        now,
    );
    render("2️⃣  队首被护士乙处理中（护士甲视角）:", &items);
    println!("    → 队首锁定时下一条对其他护士开放，队列不会停摆\n");

    let items = policy.annotate(
        QueueKind::Triage,
        fresh_queue(&[held, None, None, None]),
        nurse_b,
        now,
    );
    render("3️⃣  同一队列（持有人护士乙视角）:", &items);
    println!("    → 手上有认领时不能再领第二条，先提交或释放\n");

    // 场景三：队首租约于 09:00 获取，到 09:20 已超 15 分钟
    let expired = Some((nurse_b, at(9, 0)));
    let items = policy.annotate(
        QueueKind::Triage,
        fresh_queue(&[expired, None, None, None]),
        nurse_a,
        now,
    );
    render("4️⃣  队首租约已过期（护士甲视角）:", &items);
    println!("    → 超过 15 分钟未提交，认领自动失效，任何护士可接管");
    println!("    → 陈旧的认领字段留在原地，由下一次写入清除，没有后台清扫");
}

/// 固定日期上的时刻
fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 25, hour, minute, 0).unwrap()
}

/// 按到达顺序构造候诊队列，leases[i] 为第 i 位的认领信息
fn fresh_queue(leases: &[Option<(Uuid, DateTime<Utc>)>]) -> Vec<Encounter> {
    leases
        .iter()
        .enumerate()
        .map(|(i, lease)| {
            let occurred_at = at(9, i as u32 * 5);
            Encounter {
                id: Uuid::new_v4(),
                encounter_no: format!("E20250825-demo{:04x}", i + 1),
                patient_id: Uuid::new_v4(),
                facility_id: Uuid::new_v4(),
                status: EncounterStatus::WaitTriage,
                occurred_at,
                claimed_by: lease.map(|(who, _)| who),
                claimed_at: lease.map(|(_, when)| when),
                triage_by: None,
                doctor_id: None,
                consult_started_at: None,
                consult_ended_at: None,
                deleted_at: None,
                created_at: occurred_at,
                updated_at: occurred_at,
            }
        })
        .collect()
}

fn render(label: &str, items: &[QueueItem]) {
    println!("{}", label);
    for item in items {
        println!(
            "    {} {} (到达 {})",
            marker(item.state),
            item.encounter.encounter_no,
            item.encounter.occurred_at.format("%H:%M")
        );
    }
}

fn marker(state: QueueItemState) -> &'static str {
    match state {
        QueueItemState::Available => "⬜ 可认领",
        QueueItemState::Selected => "✅ 我持有",
        QueueItemState::ClaimedByOther => "🔒 处理中",
        QueueItemState::Disabled => "⛔ 封锁中",
    }
}
