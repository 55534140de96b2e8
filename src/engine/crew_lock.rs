// ==========================================
// 机组排班核心 - 准入咨询锁
// ==========================================
// 锁键: (rank, 重叠桶)，桶 = 固定天数的日期分段
// 规则: 一个区间覆盖的全部桶按升序加锁 (避免死锁)
// 重试: 每轮限时等待, 失败后指数退避, 超过次数返回 ConcurrencyConflict
// 回收: 释放后无人持有/等待的桶锁从注册表移除
// ==========================================

use crate::engine::error::{PlanningError, PlanningResult};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LOCK_WAIT_MS: u64 = 250;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 20;
pub const DEFAULT_BUCKET_DAYS: i64 = 28;

type BucketKey = (String, i64);
type LockTable = Arc<Mutex<HashMap<BucketKey, Arc<AsyncMutex<()>>>>>;

/// 移除仅被注册表自身引用的桶锁
fn prune_idle(table: &LockTable, rank: &str, buckets: &[i64]) {
    let Ok(mut locks) = table.lock() else {
        return;
    };
    for bucket in buckets {
        let key = (rank.to_string(), *bucket);
        if locks.get(&key).is_some_and(|handle| Arc::strong_count(handle) == 1) {
            locks.remove(&key);
        }
    }
}

// ==========================================
// LockPolicy - 重试策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub lock_wait: Duration,
    pub backoff_base: Duration,
}

impl LockPolicy {
    /// 第 attempt 次失败后的退避时长 (attempt 从 1 开始)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_wait: Duration::from_millis(DEFAULT_LOCK_WAIT_MS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        }
    }
}

/// 持有期间, 同职级且桶相交的其他裁决无法进入临界区
#[derive(Debug)]
pub struct CrewLockGuard {
    rank: String,
    buckets: Vec<i64>,
    guards: Vec<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for CrewLockGuard {
    fn drop(&mut self) {
        self.guards.clear();
        prune_idle(&self.table, &self.rank, &self.buckets);
    }
}

impl CrewLockGuard {
    pub fn rank(&self) -> &str {
        &self.rank
    }

    pub fn buckets(&self) -> &[i64] {
        &self.buckets
    }
}

// ==========================================
// CrewLockRegistry - 咨询锁注册表
// ==========================================
#[derive(Debug)]
pub struct CrewLockRegistry {
    policy: LockPolicy,
    bucket_days: i64,
    locks: LockTable,
}

impl CrewLockRegistry {
    pub fn new(policy: LockPolicy) -> Self {
        Self::with_bucket_days(policy, DEFAULT_BUCKET_DAYS)
    }

    pub fn with_bucket_days(policy: LockPolicy, bucket_days: i64) -> Self {
        Self {
            policy,
            bucket_days: bucket_days.max(1),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// 注册表中当前存活的桶锁数量
    pub fn tracked_buckets(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// 区间覆盖的桶编号 (升序)
    pub fn buckets_for(&self, start: NaiveDate, end: NaiveDate) -> Vec<i64> {
        let first = i64::from(start.num_days_from_ce()).div_euclid(self.bucket_days);
        let last = i64::from(end.num_days_from_ce()).div_euclid(self.bucket_days);
        (first..=last.max(first)).collect()
    }

    fn lock_handles(&self, rank: &str, buckets: &[i64]) -> PlanningResult<Vec<Arc<AsyncMutex<()>>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| PlanningError::Internal(format!("锁注册表获取失败: {}", e)))?;

        Ok(buckets
            .iter()
            .map(|bucket| {
                locks
                    .entry((rank.to_string(), *bucket))
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                    .clone()
            })
            .collect())
    }

    /// 获取 (rank, [start, end]) 的临界区
    ///
    /// # 返回
    /// - Ok(CrewLockGuard)
    /// - Err(ConcurrencyConflict): 重试耗尽
    pub async fn acquire(
        &self,
        rank: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PlanningResult<CrewLockGuard> {
        let buckets = self.buckets_for(start, end);
        let handles = self.lock_handles(rank, &buckets)?;
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let mut guards = Vec::with_capacity(handles.len());
            let mut timed_out = false;

            for handle in &handles {
                match tokio::time::timeout(self.policy.lock_wait, handle.clone().lock_owned()).await {
                    Ok(guard) => guards.push(guard),
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                }
            }

            if !timed_out {
                debug!(rank = %rank, attempt, buckets = ?buckets, "准入锁已获取");
                return Ok(CrewLockGuard {
                    rank: rank.to_string(),
                    buckets,
                    guards,
                    table: self.locks.clone(),
                });
            }

            // 释放已持有的部分锁再退避
            drop(guards);
            if attempt < attempts {
                let backoff = self.policy.backoff_for(attempt);
                debug!(rank = %rank, attempt, backoff_ms = backoff.as_millis() as u64, "准入锁等待超时, 退避重试");
                tokio::time::sleep(backoff).await;
            }
        }

        drop(handles);
        prune_idle(&self.locks, rank, &buckets);

        warn!(rank = %rank, attempts, "准入锁重试耗尽");
        Err(PlanningError::ConcurrencyConflict {
            rank: rank.to_string(),
            attempts,
        })
    }
}

impl Default for CrewLockRegistry {
    fn default() -> Self {
        Self::new(LockPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, day).unwrap()
    }

    fn fast_policy() -> LockPolicy {
        LockPolicy {
            max_attempts: 3,
            lock_wait: Duration::from_millis(20),
            backoff_base: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = LockPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(40));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(80));
    }

    #[test]
    fn test_buckets_ascending() {
        let registry = CrewLockRegistry::default();
        let buckets = registry.buckets_for(d(1, 1), d(3, 31));
        assert!(buckets.len() >= 3);
        assert!(buckets.windows(2).all(|w| w[0] + 1 == w[1]));
        assert_eq!(registry.buckets_for(d(1, 5), d(1, 5)).len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_after_retries() {
        let registry = CrewLockRegistry::new(fast_policy());
        let _held = registry.acquire("Captain", d(1, 10), d(1, 20)).await.unwrap();

        let err = registry.acquire("Captain", d(1, 15), d(1, 16)).await.unwrap_err();
        assert!(matches!(err, PlanningError::ConcurrencyConflict { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_ranks_are_independent() {
        let registry = CrewLockRegistry::new(fast_policy());
        let _captain = registry.acquire("Captain", d(1, 10), d(1, 20)).await.unwrap();
        let officer = registry.acquire("FirstOfficer", d(1, 10), d(1, 20)).await;
        assert!(officer.is_ok());
    }

    #[tokio::test]
    async fn test_released_on_drop() {
        let registry = CrewLockRegistry::new(fast_policy());
        {
            let guard = registry.acquire("Captain", d(1, 10), d(1, 20)).await.unwrap();
            assert_eq!(guard.rank(), "Captain");
        }
        assert!(registry.acquire("Captain", d(1, 10), d(1, 20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_buckets_are_pruned() {
        let registry = CrewLockRegistry::new(fast_policy());
        for month in 1..=12 {
            let guard = registry.acquire("Captain", d(month, 1), d(month, 20)).await.unwrap();
            assert!(registry.tracked_buckets() >= guard.buckets().len());
        }
        assert_eq!(registry.tracked_buckets(), 0);

        let held = registry.acquire("Captain", d(1, 10), d(1, 20)).await.unwrap();
        let tracked = registry.tracked_buckets();
        assert!(registry.acquire("Captain", d(1, 15), d(1, 16)).await.is_err());
        assert_eq!(registry.tracked_buckets(), tracked);

        drop(held);
        assert_eq!(registry.tracked_buckets(), 0);
    }
}
