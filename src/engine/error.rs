// ==========================================
// 机组排班核心 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: CapacityOverflow 不是错误, 是计划上的软标记
// ==========================================

use crate::repository::error::RepositoryError;
use chrono::NaiveDate;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum PlanningError {
    // ===== 配置错误 (触发操作失败, 不破坏台账) =====
    #[error("配置错误: {0}")]
    Config(String),

    #[error("未配置的资质类别: {0}")]
    UnknownCategory(String),

    #[error("未配置最低配员: rank={0}")]
    MissingRankMinimum(String),

    #[error("日期早于周期锚点: date={date}, anchor={anchor}")]
    BeforeAnchor { date: NaiveDate, anchor: NaiveDate },

    // ===== 校验错误 (变更前中止) =====
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("日期区间非法: start={start} 必须早于 end={end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    // ===== 视界诊断 =====
    #[error("窗口超出排程视界: window_start={window_start}, horizon_end={horizon_end}")]
    HorizonExceeded {
        window_start: NaiveDate,
        horizon_end: NaiveDate,
    },

    // ===== 并发控制 =====
    #[error("并发冲突: rank={rank}, 重试{attempts}次后仍无法获取锁")]
    ConcurrencyConflict { rank: String, attempts: u32 },

    #[error("批次已取消")]
    Cancelled,

    // ===== 下层错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PlanningError {
    /// 是否为配置类错误
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PlanningError::Config(_)
                | PlanningError::UnknownCategory(_)
                | PlanningError::MissingRankMinimum(_)
                | PlanningError::BeforeAnchor { .. }
        )
    }
}

/// Result 类型别名
pub type PlanningResult<T> = Result<T, PlanningError>;
