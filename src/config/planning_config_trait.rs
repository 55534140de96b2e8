// ==========================================
// 机组排班核心 - 排班配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::grace_profile::GraceRule;
use crate::domain::period::YearRollover;
use crate::engine::crew_lock::LockPolicy;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::error::Error;

// ==========================================
// PlanningConfigReader Trait
// ==========================================
// 用途: 周期日历、宽限策略、产能、最低配员的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait PlanningConfigReader: Send + Sync {
    // ===== 周期日历 =====

    /// 获取周期锚点日期
    ///
    /// # 默认值
    /// - 2025-01-01
    async fn get_period_anchor_date(&self) -> Result<NaiveDate, Box<dyn Error>>;

    /// 获取周期长度（天）
    ///
    /// # 默认值
    /// - 28
    async fn get_period_length_days(&self) -> Result<i64, Box<dyn Error>>;

    /// 获取跨年编号规则
    ///
    /// # 默认值
    /// - CALENDAR_YEAR
    async fn get_year_rollover(&self) -> Result<YearRollover, Box<dyn Error>>;

    // ===== 宽限策略 =====

    /// 获取类别 → 宽限规则表
    ///
    /// # 默认值
    /// - 空表（所有类别均视为未配置）
    async fn get_grace_rules(&self) -> Result<HashMap<String, GraceRule>, Box<dyn Error>>;

    // ===== 产能 =====

    /// 获取默认每周期产能
    ///
    /// # 默认值
    /// - 10
    async fn get_default_capacity(&self) -> Result<u32, Box<dyn Error>>;

    /// 获取类别产能覆写表
    async fn get_category_capacity(&self) -> Result<HashMap<String, u32>, Box<dyn Error>>;

    /// 获取分批并行的批大小
    ///
    /// # 默认值
    /// - 10
    async fn get_worker_batch_size(&self) -> Result<usize, Box<dyn Error>>;

    // ===== 最低配员 =====

    /// 获取职级最低配员
    ///
    /// # 返回
    /// - Some(n): 已配置
    /// - None: 未配置（调用方应视为配置错误）
    async fn get_minimum_crew(&self, rank: &str) -> Result<Option<u32>, Box<dyn Error>>;

    /// 获取完整的职级最低配员表
    async fn get_minimum_crew_table(&self) -> Result<HashMap<String, u32>, Box<dyn Error>>;

    /// 已确认复训是否视为离岗
    ///
    /// # 默认值
    /// - false
    async fn get_renewals_remove_from_duty(&self) -> Result<bool, Box<dyn Error>>;

    // ===== 并发控制 =====

    /// 获取准入锁重试策略
    ///
    /// # 默认值
    /// - max_attempts=3, lock_wait=250ms, backoff_base=20ms
    async fn get_lock_policy(&self) -> Result<LockPolicy, Box<dyn Error>>;
}
