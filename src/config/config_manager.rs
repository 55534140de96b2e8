// ==========================================
// 机组排班核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 红线: 配置格式错误返回错误, 不静默回落默认值
// ==========================================

use crate::config::grace_profile::GraceRule;
use crate::config::planning_config_trait::PlanningConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::period::{YearRollover, DEFAULT_PERIOD_LENGTH_DAYS};
use crate::engine::crew_lock::{
    LockPolicy, DEFAULT_BACKOFF_BASE_MS, DEFAULT_LOCK_WAIT_MS, DEFAULT_MAX_ATTEMPTS,
};
use crate::engine::renewal_allocator::DEFAULT_WORKER_BATCH_SIZE;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_ANCHOR_DATE: &str = "2025-01-01";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 解析数值配置, 格式错误时报错并带上配置键
    fn get_parsed<T>(&self, key: &str, default: &str) -> Result<T, Box<dyn Error>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.get_config_or_default(key, default)?;
        value
            .trim()
            .parse::<T>()
            .map_err(|e| format!("配置格式错误: key={}, value={}, {}", key, value, e).into())
    }

    /// 解析 JSON 配置, 缺省为空对象
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, Box<dyn Error>> {
        let value = self.get_config_or_default(key, "{}")?;
        serde_json::from_str(&value)
            .map_err(|e| format!("配置格式错误: key={}, {}", key, e).into())
    }

    /// 写入配置 (UPSERT)
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::debug!(config_key = key, "配置已写入");
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 在生成复训计划时记录配置快照
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }
}

// ==========================================
// PlanningConfigReader Trait 实现
// ==========================================
#[async_trait]
impl PlanningConfigReader for ConfigManager {
    // ===== 周期日历 =====

    async fn get_period_anchor_date(&self) -> Result<NaiveDate, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::PERIOD_ANCHOR_DATE, DEFAULT_ANCHOR_DATE)?;
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
            format!(
                "周期锚点格式错误: key={}, value={}, {}",
                config_keys::PERIOD_ANCHOR_DATE,
                value,
                e
            )
            .into()
        })
    }

    async fn get_period_length_days(&self) -> Result<i64, Box<dyn Error>> {
        self.get_parsed(
            config_keys::PERIOD_LENGTH_DAYS,
            &DEFAULT_PERIOD_LENGTH_DAYS.to_string(),
        )
    }

    async fn get_year_rollover(&self) -> Result<YearRollover, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::PERIOD_YEAR_ROLLOVER, "CALENDAR_YEAR")?;
        YearRollover::parse(&value).ok_or_else(|| {
            format!(
                "跨年规则格式错误: key={}, value={}",
                config_keys::PERIOD_YEAR_ROLLOVER,
                value
            )
            .into()
        })
    }

    // ===== 宽限策略 =====

    async fn get_grace_rules(&self) -> Result<HashMap<String, GraceRule>, Box<dyn Error>> {
        self.get_json(config_keys::GRACE_POLICY)
    }

    // ===== 产能 =====

    async fn get_default_capacity(&self) -> Result<u32, Box<dyn Error>> {
        self.get_parsed(config_keys::CAPACITY_DEFAULT_PER_PERIOD, "10")
    }

    async fn get_category_capacity(&self) -> Result<HashMap<String, u32>, Box<dyn Error>> {
        self.get_json(config_keys::CAPACITY_BY_CATEGORY)
    }

    async fn get_worker_batch_size(&self) -> Result<usize, Box<dyn Error>> {
        let size: usize = self.get_parsed(
            config_keys::ALLOCATOR_WORKER_BATCH_SIZE,
            &DEFAULT_WORKER_BATCH_SIZE.to_string(),
        )?;
        if size == 0 {
            return Err(format!("{} 必须大于 0", config_keys::ALLOCATOR_WORKER_BATCH_SIZE).into());
        }
        Ok(size)
    }

    // ===== 最低配员 =====

    async fn get_minimum_crew(&self, rank: &str) -> Result<Option<u32>, Box<dyn Error>> {
        let table = self.get_minimum_crew_table().await?;
        Ok(table.get(rank).copied())
    }

    async fn get_minimum_crew_table(&self) -> Result<HashMap<String, u32>, Box<dyn Error>> {
        self.get_json(config_keys::CREW_MINIMUM_BY_RANK)
    }

    async fn get_renewals_remove_from_duty(&self) -> Result<bool, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::CREW_RENEWALS_REMOVE_FROM_DUTY, "false")?;
        match value.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(format!(
                "配置格式错误: key={}, value={}",
                config_keys::CREW_RENEWALS_REMOVE_FROM_DUTY,
                other
            )
            .into()),
        }
    }

    // ===== 并发控制 =====

    async fn get_lock_policy(&self) -> Result<LockPolicy, Box<dyn Error>> {
        let max_attempts: u32 = self.get_parsed(
            config_keys::ELIGIBILITY_MAX_ATTEMPTS,
            &DEFAULT_MAX_ATTEMPTS.to_string(),
        )?;
        let lock_wait_ms: u64 = self.get_parsed(
            config_keys::ELIGIBILITY_LOCK_WAIT_MS,
            &DEFAULT_LOCK_WAIT_MS.to_string(),
        )?;
        let backoff_base_ms: u64 = self.get_parsed(
            config_keys::ELIGIBILITY_BACKOFF_BASE_MS,
            &DEFAULT_BACKOFF_BASE_MS.to_string(),
        )?;

        Ok(LockPolicy {
            max_attempts: max_attempts.max(1),
            lock_wait: Duration::from_millis(lock_wait_ms),
            backoff_base: Duration::from_millis(backoff_base_ms),
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 周期日历
    pub const PERIOD_ANCHOR_DATE: &str = "period.anchor_date";
    pub const PERIOD_LENGTH_DAYS: &str = "period.length_days";
    pub const PERIOD_YEAR_ROLLOVER: &str = "period.year_rollover"; // CALENDAR_YEAR | FIXED_CYCLE:<k>

    // 宽限策略 (JSON: 类别 → {lookahead, grace})
    pub const GRACE_POLICY: &str = "grace.policy";

    // 产能
    pub const CAPACITY_DEFAULT_PER_PERIOD: &str = "capacity.default_per_period";
    pub const CAPACITY_BY_CATEGORY: &str = "capacity.by_category"; // JSON: 类别 → 产能

    // 最低配员
    pub const CREW_MINIMUM_BY_RANK: &str = "crew.minimum_by_rank"; // JSON: 职级 → 人数
    pub const CREW_RENEWALS_REMOVE_FROM_DUTY: &str = "crew.renewals_remove_from_duty";

    // 分批并行
    pub const ALLOCATOR_WORKER_BATCH_SIZE: &str = "allocator.worker_batch_size";

    // 准入锁
    pub const ELIGIBILITY_MAX_ATTEMPTS: &str = "eligibility.max_attempts";
    pub const ELIGIBILITY_LOCK_WAIT_MS: &str = "eligibility.lock_wait_ms";
    pub const ELIGIBILITY_BACKOFF_BASE_MS: &str = "eligibility.backoff_base_ms";
}
