//! 门诊工作流演示程序
//!
//! 以内存存储走完一条完整就诊链路：挂号 → 分诊认领与提交 → 医生领取 →
//! 问诊 → 诊断/处方/检验 → 完诊，最后回放审计时间线。

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use clinic_core::{
    Actor, ActorRole, DiagnosisInput, EncounterStatus, EncounterStore, LabOrderInput,
    NewEncounter, NewPatient, PrescriptionInput, TriageInput,
};
use clinic_workflow::{
    MemoryEncounterStore, QueueItemState, QueueKind, WorkflowEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🏥 门诊就诊流程演示\n");

    // 1. 组装引擎（内存存储 + 15 分钟租约）
    let store = Arc::new(MemoryEncounterStore::new());
    let engine = WorkflowEngine::new(store, Duration::minutes(15));
    let facility_id = Uuid::new_v4();

    // 2. 在岗人员
    let registrar = Actor::new("挂号员小李", ActorRole::Registration, facility_id);
    let nurse_wang = Actor::new("护士小王", ActorRole::Nurse, facility_id);
    let nurse_zhang = Actor::new("护士小张", ActorRole::Nurse, facility_id);
    let doctor_liu = Actor::new("刘医生", ActorRole::Doctor, facility_id);
    println!("✅ 在岗人员就位: 挂号员 1 名、护士 2 名、医生 1 名");

    // 3. 三位患者先后挂号
    let mut encounters = Vec::new();
    for (no, name) in [
        ("P20250825001", "王强"),
        ("P20250825002", "赵敏"),
        ("P20250825003", "孙涛"),
    ] {
        let patient = engine
            .register_patient(
                NewPatient {
                    patient_no: no.to_string(),
                    name: name.to_string(),
                    sex: None,
                    birth_date: None,
                },
                &registrar,
            )
            .await?;
        let encounter = engine
            .create_encounter(
                NewEncounter {
                    patient_id: patient.id,
                    facility_id,
                },
                &registrar,
            )
            .await?;
        println!("📋 {} 挂号完成，就诊号 {}", name, encounter.encounter_no);
        encounters.push(encounter);
    }

    // 4. 分诊队列：严格先进先出
    print_queue(&engine, QueueKind::Triage, &nurse_wang, "护士小王").await?;

    // 跳过队首直接认领第三位 → 拒绝
    println!("\n🚫 护士小张尝试跳过队首认领第三位:");
    match engine.claim_triage(encounters[2].id, &nurse_zhang).await {
        Err(e) => println!("   被拒绝: {}", e),
        Ok(_) => println!("   （不应发生）"),
    }

    // 5. 护士小王认领队首
    engine.claim_triage(encounters[0].id, &nurse_wang).await?;
    println!("\n✅ 护士小王认领队首 {}", encounters[0].encounter_no);

    // 小张再抢同一条 → 冲突；但队首被占后第二位对她开放
    match engine.claim_triage(encounters[0].id, &nurse_zhang).await {
        Err(e) => println!("🔒 护士小张抢队首失败: {}", e),
        Ok(_) => println!("   （不应发生）"),
    }
    engine.claim_triage(encounters[1].id, &nurse_zhang).await?;
    println!("✅ 队首被占后，护士小张认领第二位 {}", encounters[1].encounter_no);

    print_queue(&engine, QueueKind::Triage, &nurse_zhang, "护士小张").await?;

    // 6. 小王提交分诊；小张改变主意退回认领
    engine
        .submit_triage(
            encounters[0].id,
            TriageInput {
                chief_complaint: "发热伴咽痛两天".to_string(),
                temperature_c: Some(38.6),
                pulse_bpm: Some(92),
                systolic_mmhg: Some(128),
                diastolic_mmhg: Some(82),
                ..Default::default()
            },
            &nurse_wang,
        )
        .await?;
    println!("\n✅ 护士小王提交 {} 的分诊，进入候医队列", encounters[0].encounter_no);

    engine.release_triage(encounters[1].id, &nurse_zhang).await?;
    println!("↩️  护士小张释放 {}，回到分诊队列", encounters[1].encounter_no);

    // 7. 医生领取并问诊
    print_queue(&engine, QueueKind::Doctor, &doctor_liu, "刘医生").await?;

    engine
        .claim_doctor_queue_item(encounters[0].id, &doctor_liu)
        .await?;
    engine
        .start_consultation(encounters[0].id, &doctor_liu)
        .await?;
    println!("\n🩺 刘医生领取 {} 并开始问诊", encounters[0].encounter_no);

    // 没有诊断时不允许完诊
    match engine
        .complete_consultation(encounters[0].id, EncounterStatus::Done, &doctor_liu)
        .await
    {
        Err(e) => println!("⚠️  未录入诊断，完诊被拒绝: {}", e),
        Ok(_) => println!("   （不应发生）"),
    }

    // 8. 录入临床内容
    engine
        .add_diagnosis(
            encounters[0].id,
            DiagnosisInput {
                code: "J02.9".to_string(),
                description: "急性咽炎".to_string(),
            },
            &doctor_liu,
        )
        .await?;
    engine
        .add_prescription(
            encounters[0].id,
            PrescriptionInput {
                medication: "布洛芬缓释胶囊".to_string(),
                dose: "300mg".to_string(),
                frequency: "bid".to_string(),
                days: 3,
                quantity: 6,
                notes: None,
            },
            &doctor_liu,
        )
        .await?;
    engine
        .add_lab_order(
            encounters[0].id,
            LabOrderInput {
                test_code: "CBC".to_string(),
                test_name: "血常规".to_string(),
                specimen: Some("静脉血".to_string()),
                notes: None,
            },
            &doctor_liu,
        )
        .await?;
    println!("✅ 录入诊断 J02.9、处方与检验申请");

    // 9. 完诊，转药房
    let done = engine
        .complete_consultation(encounters[0].id, EncounterStatus::ForPharmacy, &doctor_liu)
        .await?;
    println!("🏁 {} 完诊，去向: {:?}", done.encounter_no, done.status);

    // 10. 审计时间线
    let trail = engine.encounter_audit(encounters[0].id, &doctor_liu).await?;
    println!("\n📜 就诊 {} 审计时间线:", done.encounter_no);
    for entry in &trail {
        println!(
            "   {} | {:<18} | {}",
            entry.created_at.format("%H:%M:%S"),
            format!("{:?}", entry.action),
            entry.actor_name
        );
    }

    println!("\n✨ 演示结束");
    Ok(())
}

/// 打印指定查看者眼中的队列
async fn print_queue<S: EncounterStore>(
    engine: &WorkflowEngine<S>,
    kind: QueueKind,
    viewer: &Actor,
    label: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = engine.visible_queue(kind, viewer, None).await?;
    println!("\n📊 {} 看到的{}队列:", label, kind_label(kind));
    for item in &items {
        println!(
            "   {} {} ({:?})",
            state_marker(item.state),
            item.encounter.encounter_no,
            item.encounter.status
        );
    }
    Ok(())
}

fn kind_label(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::Triage => "分诊",
        QueueKind::Doctor => "候医",
    }
}

fn state_marker(state: QueueItemState) -> &'static str {
    match state {
        QueueItemState::Available => "⬜ 可认领",
        QueueItemState::Selected => "✅ 我持有",
        QueueItemState::ClaimedByOther => "🔒 他人处理中",
        QueueItemState::Disabled => "⛔ 禁止跳号",
    }
}
