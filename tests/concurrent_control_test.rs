// ==========================================
// 并发控制测试
// ==========================================
// 职责: 验证准入临界区与锁重试机制
// 红线: 任何交错下都不能批准超出最低配员允许的请假
// ==========================================


#[cfg(test)]
mod concurrent_control_test {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crew_roster_aps::api::{ApiError, EligibilityApi};
    use crew_roster_aps::config::ConfigManager;
    use crew_roster_aps::engine::{CrewLockRegistry, LockPolicy, OptionalHistorySink};
    use crew_roster_aps::repository::LeaveRequestRepository;
    use crew_roster_aps::{DecisionOutcome, LeaveStatus};
    use rusqlite::Connection;
    use tempfile::NamedTempFile;

    use crate::test_helpers::{
        create_test_db, d, insert_test_config, seed_crew, set_minimum_crew, shared_conn,
    };

    // ==========================================
    // 测试辅助函数
    // ==========================================

    fn setup_test_env(
        total: usize,
        minimum: u32,
        locks: Arc<CrewLockRegistry>,
    ) -> (NamedTempFile, Arc<Mutex<Connection>>, Arc<EligibilityApi>) {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = shared_conn(&db_path);
        let config = insert_test_config(conn.clone()).unwrap();
        set_minimum_crew(&config, &format!(r#"{{"Captain": {}}}"#, minimum)).unwrap();
        seed_crew(conn.clone(), "Captain", "CP", total).unwrap();

        let api = EligibilityApi::new(
            Arc::new(LeaveRequestRepository::from_connection(conn.clone())),
            Arc::new(ConfigManager::from_connection(conn.clone()).unwrap()),
            locks,
            OptionalHistorySink::none(),
        );
        (temp_file, conn, Arc::new(api))
    }

    fn count_approved(api: &EligibilityApi) -> usize {
        api.list_requests("Captain", Some(LeaveStatus::Approved))
            .unwrap()
            .len()
    }

    // ==========================================
    // 测试用例
    // ==========================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_concurrent_decisions_approve_exactly_one() {
        // 在岗 11 / 最低 10: 只能批准一人
        let (_temp, _conn, api) = setup_test_env(11, 10, Arc::new(CrewLockRegistry::default()));
        api.submit_request(Some("L-A"), "CP-02", d(2026, 1, 10), d(2026, 1, 20))
            .unwrap();
        api.submit_request(Some("L-B"), "CP-05", d(2026, 1, 12), d(2026, 1, 18))
            .unwrap();

        let handles: Vec<_> = ["L-A", "L-B"]
            .into_iter()
            .map(|id| {
                let api = api.clone();
                tokio::spawn(async move { api.decide_request(id, None).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap().outcome);
        }

        let approved = outcomes
            .iter()
            .filter(|o| **o == DecisionOutcome::Approved)
            .count();
        assert_eq!(approved, 1, "outcomes: {:?}", outcomes);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, DecisionOutcome::Denied | DecisionOutcome::Conflict)));
        assert_eq!(count_approved(&api), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_never_breaches_minimum() {
        // 在岗 12 / 最低 10: 最多批准两人
        let (_temp, _conn, api) = setup_test_env(12, 10, Arc::new(CrewLockRegistry::default()));
        let ids: Vec<String> = (1..=8).map(|n| format!("L-{}", n)).collect();
        for (n, id) in ids.iter().enumerate() {
            api.submit_request(Some(id.as_str()), &format!("CP-{:02}", n + 1), d(2026, 2, 1), d(2026, 2, 10))
                .unwrap();
        }

        let handles: Vec<_> = ids
            .iter()
            .rev()
            .cloned()
            .map(|id| {
                let api = api.clone();
                tokio::spawn(async move { api.decide_request(&id, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(count_approved(&api) <= 2);

        // 按资历重放后名额被补足, 且仍不超限
        api.replay_conflicts("Captain").await.unwrap();
        assert_eq!(count_approved(&api), 2);
        assert!(api
            .list_requests("Captain", Some(LeaveStatus::Conflict))
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_contention_surfaces_concurrency_conflict() {
        let locks = Arc::new(CrewLockRegistry::new(LockPolicy {
            max_attempts: 2,
            lock_wait: Duration::from_millis(20),
            backoff_base: Duration::from_millis(5),
        }));
        let (_temp, _conn, api) = setup_test_env(11, 10, locks.clone());
        api.submit_request(Some("L-A"), "CP-02", d(2026, 1, 10), d(2026, 1, 20))
            .unwrap();

        // 外部持有同职级、同区间的临界区
        let held = locks
            .acquire("Captain", d(2026, 1, 1), d(2026, 1, 31))
            .await
            .unwrap();

        let err = api.decide_request("L-A", None).await.unwrap_err();
        assert!(matches!(err, ApiError::ConcurrencyConflict(_)), "unexpected: {}", err);
        assert_eq!(api.get_request("L-A").unwrap().status, LeaveStatus::Pending);

        drop(held);
        let decision = api.decide_request("L-A", None).await.unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Approved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_other_rank_lock_does_not_block() {
        let locks = Arc::new(CrewLockRegistry::new(LockPolicy {
            max_attempts: 1,
            lock_wait: Duration::from_millis(20),
            backoff_base: Duration::from_millis(5),
        }));
        let (_temp, _conn, api) = setup_test_env(11, 10, locks.clone());
        api.submit_request(Some("L-A"), "CP-02", d(2026, 1, 10), d(2026, 1, 20))
            .unwrap();

        let _held = locks
            .acquire("FirstOfficer", d(2026, 1, 1), d(2026, 1, 31))
            .await
            .unwrap();

        let decision = api.decide_request("L-A", None).await.unwrap();
        assert!(decision.is_approved());
    }
}
