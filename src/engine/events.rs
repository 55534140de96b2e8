// ==========================================
// 机组排班核心 - 历史事件出口
// ==========================================
// 职责: 定义历史事件写入 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Repository 层实现
// 红线: 历史写入失败只告警, 不回滚已提交的计划/裁决
// ==========================================

use crate::domain::history::HistoryEvent;
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 历史事件写入 Trait
// ==========================================

/// 历史事件写入者 Trait
///
/// Engine 层定义，`HistoryEventRepository` 实现
pub trait HistorySink: Send + Sync {
    /// 写入历史事件
    ///
    /// # 返回
    /// - `Ok(event_id)`
    /// - `Err`: 写入失败
    fn record(&self, event: HistoryEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作写入者
///
/// 用于不需要留痕的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpHistorySink;

impl HistorySink for NoOpHistorySink {
    fn record(&self, event: HistoryEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpHistorySink: 跳过历史写入 - event_type={}, entity_id={}",
            event.event_type,
            event.entity_id
        );
        Ok(event.event_id)
    }
}

/// 可选的写入者包装
///
/// 简化 Option<Arc<dyn HistorySink>> 的使用
#[derive(Clone)]
pub struct OptionalHistorySink {
    inner: Option<Arc<dyn HistorySink>>,
}

impl OptionalHistorySink {
    pub fn with_sink(sink: Arc<dyn HistorySink>) -> Self {
        Self { inner: Some(sink) }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 写入事件, 失败时仅记录告警
    pub fn record_or_warn(&self, event: HistoryEvent) {
        let Some(sink) = &self.inner else {
            tracing::debug!(
                "OptionalHistorySink: 未配置写入者，跳过事件 - event_type={}",
                event.event_type
            );
            return;
        };

        let event_type = event.event_type;
        let entity_id = event.entity_id.clone();
        if let Err(e) = sink.record(event) {
            tracing::warn!(
                event_type = %event_type,
                entity_id = %entity_id,
                error = %e,
                "历史事件写入失败"
            );
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalHistorySink {
    fn default() -> Self {
        Self::none()
    }
}
