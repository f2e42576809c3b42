//! 数据库连接管理

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use clinic_core::{ClinicError, Result};

/// 数据库连接池
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// 建立连接池
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| ClinicError::Database(e.to_string()))?;

        tracing::info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// 获取底层连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
