//! 门诊工作流服务器主程序

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use clinic_core::{ClinicError, Result};
use clinic_database::{DatabasePool, DatabaseQueries, PgEncounterStore};
use clinic_web::{WebServer, WorkerRegistry};
use clinic_workflow::WorkflowEngine;

mod config;
use config::ClinicConfig;

/// 门诊工作流服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "clinic-server")]
#[command(about = "门诊就诊流程协调服务器 (Clinic Encounter Workflow Server)")]
struct Args {
    /// 监听端口（覆盖配置文件）
    #[arg(short, long)]
    port: Option<u16>,

    /// 数据库连接串（覆盖配置文件）
    #[arg(short, long)]
    database_url: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别（覆盖配置文件）
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置，命令行参数优先
    let mut config = ClinicConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.database_url {
        config.database.connection_string = url;
    }

    // 初始化日志
    let filter = args
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());
    let fmt = tracing_subscriber::fmt().with_env_filter(filter.as_str());
    match config.logging.format.as_str() {
        "compact" => fmt.compact().init(),
        _ => fmt.init(),
    }

    info!("启动门诊工作流服务器...");
    info!("服务器配置:");
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  租约时长: {} 分钟", config.workflow.lease_ttl_minutes);
    info!("  数据库连接数上限: {}", config.database.max_connections);

    // 连接数据库并初始化表结构
    let pool = DatabasePool::new(
        &config.database.connection_string,
        config.database.max_connections,
        std::time::Duration::from_secs(config.database.connect_timeout_secs),
    )
    .await?;
    let queries = DatabaseQueries::new(&pool);
    queries.create_tables().await?;

    // 组装工作流引擎
    let store = Arc::new(PgEncounterStore::new(pool.pool().clone()));
    let engine = Arc::new(WorkflowEngine::new(
        store,
        chrono::Duration::minutes(config.workflow.lease_ttl_minutes),
    ));

    // 工作人员注册表
    let facility_id = config.workflow.facility_id.unwrap_or_else(Uuid::new_v4);
    info!("  机构标识: {}", facility_id);
    let workers = WorkerRegistry::new();
    if config.workflow.seed_demo_workers {
        workers.seed_defaults(facility_id).await;
    }

    // 启动Web服务器
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ClinicError::Config(format!("invalid listen address: {}", e)))?;
    let server = WebServer::new(addr, engine, workers);

    if let Err(e) = server.run().await {
        error!("服务器启动失败: {}", e);
        return Err(e);
    }

    Ok(())
}
