//! 数据库建表与索引

use clinic_core::{ClinicError, Result};

use crate::connection::DatabasePool;

/// 数据库结构管理接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                patient_no VARCHAR(64) UNIQUE NOT NULL,
                name VARCHAR(255) NOT NULL,
                sex CHAR(1),
                birth_date DATE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建就诊表：认领租约即 claimed_by/claimed_at 两列，无独立租约表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS encounters (
                id UUID PRIMARY KEY,
                encounter_no VARCHAR(32) UNIQUE NOT NULL,
                patient_id UUID NOT NULL REFERENCES patients(id),
                facility_id UUID NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'WAIT_TRIAGE',
                occurred_at TIMESTAMP WITH TIME ZONE NOT NULL,
                occurred_on DATE NOT NULL,
                claimed_by UUID,
                claimed_at TIMESTAMP WITH TIME ZONE,
                triage_by UUID,
                doctor_id UUID,
                consult_started_at TIMESTAMP WITH TIME ZONE,
                consult_ended_at TIMESTAMP WITH TIME ZONE,
                deleted_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建分诊记录表（与就诊一对一）
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS triage_records (
                id UUID PRIMARY KEY,
                encounter_id UUID UNIQUE NOT NULL REFERENCES encounters(id),
                temperature_c DOUBLE PRECISION,
                systolic_mmhg INTEGER,
                diastolic_mmhg INTEGER,
                pulse_bpm INTEGER,
                respiratory_rate INTEGER,
                weight_kg DOUBLE PRECISION,
                height_cm DOUBLE PRECISION,
                chief_complaint TEXT NOT NULL,
                screening_notes TEXT,
                triage_by UUID NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建诊断表（软删除）
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS diagnoses (
                id UUID PRIMARY KEY,
                encounter_id UUID NOT NULL REFERENCES encounters(id),
                code VARCHAR(32) NOT NULL,
                description TEXT NOT NULL,
                doctor_id UUID NOT NULL,
                deleted_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建处方表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS prescriptions (
                id UUID PRIMARY KEY,
                encounter_id UUID NOT NULL REFERENCES encounters(id),
                doctor_id UUID NOT NULL,
                medication VARCHAR(255) NOT NULL,
                dose VARCHAR(64) NOT NULL,
                frequency VARCHAR(64) NOT NULL,
                days INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                notes TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建检验申请表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS lab_orders (
                id UUID PRIMARY KEY,
                encounter_id UUID NOT NULL REFERENCES encounters(id),
                doctor_id UUID NOT NULL,
                test_code VARCHAR(32) NOT NULL,
                test_name VARCHAR(255) NOT NULL,
                specimen VARCHAR(64),
                notes TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建审计日志表（只追加；seq 提供稳定时间线排序）
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                seq BIGSERIAL PRIMARY KEY,
                id UUID UNIQUE NOT NULL,
                actor_id UUID NOT NULL,
                actor_name VARCHAR(255) NOT NULL,
                action VARCHAR(32) NOT NULL,
                entity_type VARCHAR(32) NOT NULL,
                entity_id UUID NOT NULL,
                metadata JSONB NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ClinicError::Database(e.to_string()))?;

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_patients_patient_no ON patients(patient_no)",
            "CREATE INDEX IF NOT EXISTS idx_encounters_patient_id ON encounters(patient_id)",
            // 队列快照的主访问路径：机构 + 日期 + 状态
            "CREATE INDEX IF NOT EXISTS idx_encounters_queue ON encounters(facility_id, occurred_on, status)",
            // 当日唯一有效就诊：已取消与软删除的行不参与约束
            "CREATE UNIQUE INDEX IF NOT EXISTS uniq_encounters_patient_day ON encounters(patient_id, facility_id, occurred_on) WHERE deleted_at IS NULL AND status <> 'CANCELLED'",
            "CREATE INDEX IF NOT EXISTS idx_triage_records_encounter_id ON triage_records(encounter_id)",
            "CREATE INDEX IF NOT EXISTS idx_diagnoses_encounter_id ON diagnoses(encounter_id)",
            // 同一就诊内有效诊断编码唯一
            "CREATE UNIQUE INDEX IF NOT EXISTS uniq_diagnoses_live_code ON diagnoses(encounter_id, code) WHERE deleted_at IS NULL",
            "CREATE INDEX IF NOT EXISTS idx_prescriptions_encounter_id ON prescriptions(encounter_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_orders_encounter_id ON lab_orders(encounter_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_type, entity_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| ClinicError::Database(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}
