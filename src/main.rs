// ==========================================
// 机组排班核心 - 命令行入口
// ==========================================
// 用法:
//   crew-roster-aps [horizon_months] [today]
//
// 1. 生成复训计划 (默认视界 6 个月, today 默认为本地当天)
// 2. 按资历重放各职级的未决请假申请
// 3. 将汇总以 JSON 输出到 stdout
// 数据库路径: 环境变量 CREW_ROSTER_APS_DB_PATH 或用户数据目录
// ==========================================

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{Local, NaiveDate};
use serde_json::json;

use crew_roster_aps::api::{EligibilityApi, RenewalApi};
use crew_roster_aps::config::{ConfigManager, PlanningSettings};
use crew_roster_aps::db::{default_db_path, init_schema, open_sqlite_connection};
use crew_roster_aps::logging;

const DEFAULT_HORIZON_MONTHS: u32 = 6;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let horizon_months = match args.next() {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("horizon_months 格式错误: {}", raw))?,
        None => DEFAULT_HORIZON_MONTHS,
    };
    let today = match args.next() {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("today 格式错误: {}", raw))?,
        None => Local::now().date_naive(),
    };

    tracing::info!("==================================================");
    tracing::info!("{} v{}", crew_roster_aps::APP_NAME, crew_roster_aps::VERSION);
    tracing::info!("==================================================");

    let db_path = default_db_path();
    tracing::info!(db_path = %db_path, "使用数据库");

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("打开数据库失败: {}", db_path))?;
    init_schema(&conn).context("初始化数据库表结构失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())
        .map_err(|e| anyhow!("配置管理器初始化失败: {}", e))?;
    let settings = PlanningSettings::load(&config).await?;
    let renewal_api = RenewalApi::from_connection(conn.clone())?;
    let eligibility_api = EligibilityApi::from_connection(conn).await?;

    let report = renewal_api
        .generate_renewal_plan(horizon_months, &[], false, today)
        .await?;

    let mut replays = Vec::new();
    for rank in settings.ranks() {
        let decisions = eligibility_api.replay_conflicts(&rank).await?;
        replays.push(json!({
            "rank": rank,
            "decided": decisions.len(),
            "approved": decisions.iter().filter(|d| d.is_approved()).count(),
            "decisions": decisions,
        }));
    }

    let summary = json!({
        "today": today,
        "horizon_months": horizon_months,
        "renewal": {
            "planned": report.plans.len(),
            "overflow": report.overflow_count(),
            "superseded": report.superseded_plan_ids.len(),
            "diagnostics": report.diagnostics,
        },
        "leave_replay": replays,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
