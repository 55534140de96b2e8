// ==========================================
// 复训排程 API 集成测试
// ==========================================
// 覆盖: 窗口落位、产能超限标记、重排取代/清空、
//       已确认计划跳过、取消释放台账、分组并发与取消
// ==========================================


#[cfg(test)]
mod renewal_api_test {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use crew_roster_aps::api::{ApiError, RenewalApi};
    use crew_roster_aps::config::{config_keys, ConfigManager};
    use crew_roster_aps::domain::history::{HistoryEventType, ENTITY_RENEWAL_PLAN};
    use crew_roster_aps::domain::{PendingArtifact, YearRollover};
    use crew_roster_aps::engine::PeriodCalendar;
    use crew_roster_aps::repository::{CapacityLedgerRepository, HistoryEventRepository};
    use crew_roster_aps::{DiagnosticKind, PlanStatus};
    use rusqlite::Connection;
    use tempfile::NamedTempFile;

    use crate::test_helpers::{
        create_test_db, d, insert_test_config, seed_artifacts, seed_crew, shared_conn,
    };

    // ==========================================
    // 测试辅助函数
    // ==========================================

    struct TestEnv {
        _temp_file: NamedTempFile,
        conn: Arc<Mutex<Connection>>,
        api: RenewalApi,
    }

    fn setup() -> TestEnv {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = shared_conn(&db_path);
        insert_test_config(conn.clone()).unwrap();
        let api = RenewalApi::from_connection(conn.clone()).unwrap();
        TestEnv {
            _temp_file: temp_file,
            conn,
            api,
        }
    }

    fn calendar() -> PeriodCalendar {
        PeriodCalendar::new(d(2025, 1, 1), 28, YearRollover::CalendarYear).unwrap()
    }

    /// 9 名人员的 Ground 资质, 窗口只覆盖 RP12/2025
    fn seed_ground_batch(env: &TestEnv, count: usize) {
        let crew = seed_crew(env.conn.clone(), "FirstOfficer", "FO", count).unwrap();
        let artifacts: Vec<PendingArtifact> = crew
            .iter()
            .map(|s| PendingArtifact::new(&s.id, "Ground", d(2025, 11, 15)))
            .collect();
        seed_artifacts(env.conn.clone(), &artifacts).unwrap();
    }

    fn ledger_total_reserved(env: &TestEnv) -> u32 {
        CapacityLedgerRepository::from_connection(env.conn.clone())
            .load_entries()
            .unwrap()
            .iter()
            .map(|e| e.reserved)
            .sum()
    }

    // ==========================================
    // 窗口与落位
    // ==========================================

    #[tokio::test]
    async fn test_medical_plan_lands_inside_window() {
        let env = setup();
        seed_crew(env.conn.clone(), "Captain", "CP", 1).unwrap();
        seed_artifacts(
            env.conn.clone(),
            &[PendingArtifact::new("CP-01", "Medical", d(2026, 3, 1))],
        )
        .unwrap();

        let report = env
            .api
            .generate_renewal_plan(6, &[], false, d(2025, 11, 1))
            .await
            .unwrap();

        assert_eq!(report.plans.len(), 1);
        assert!(report.diagnostics.is_empty());
        let plan = &report.plans[0];
        assert_eq!(plan.window_start, d(2025, 12, 1));
        assert_eq!(plan.window_end, d(2026, 3, 29));
        assert!(plan.window().contains(plan.planned_date));

        let period = calendar().period_by_code(&plan.planned_period).unwrap();
        assert!(period.overlaps(plan.window_start, plan.window_end));

        // 空台账平局取最早周期, 周期起始日早于窗口时钳制到窗口起点
        assert_eq!(plan.planned_period, "RP12/2025");
        assert_eq!(plan.planned_date, d(2025, 12, 1));
        assert_eq!(plan.status, PlanStatus::Planned);
        assert!(!plan.overflow);
    }

    #[tokio::test]
    async fn test_capacity_overflow_is_flagged_not_refused() {
        let env = setup();
        seed_ground_batch(&env, 9);
        env.api
            .set_period_capacity("RP12/2025", "Ground", 8)
            .await
            .unwrap();

        let report = env
            .api
            .generate_renewal_plan(6, &[], false, d(2025, 11, 1))
            .await
            .unwrap();

        assert_eq!(report.plans.len(), 9);
        assert!(report.plans.iter().all(|p| p.planned_period == "RP12/2025"));
        assert_eq!(report.plans.iter().filter(|p| !p.overflow).count(), 8);
        assert_eq!(report.overflow_count(), 1);

        // 排序为 (到期日, 人员), 最后一名承接超限
        let last = report.plans.last().unwrap();
        assert_eq!(last.subject_id, "FO-09");
        assert!(last.overflow);

        let utilization = env.api.get_utilization("RP12/2025", "Ground").await.unwrap();
        assert!((utilization - 9.0 / 8.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_earlier_expiry_is_more_urgent_and_planned_first() {
        let env = setup();
        seed_crew(env.conn.clone(), "Captain", "CP", 2).unwrap();
        seed_artifacts(
            env.conn.clone(),
            &[
                PendingArtifact::new("CP-01", "Medical", d(2026, 1, 10)),
                PendingArtifact::new("CP-02", "Medical", d(2026, 3, 10)),
            ],
        )
        .unwrap();

        let report = env
            .api
            .generate_renewal_plan(6, &[], false, d(2025, 11, 1))
            .await
            .unwrap();

        let plan_of = |id: &str| report.plans.iter().find(|p| p.subject_id == id).unwrap();
        assert!(plan_of("CP-01").priority > plan_of("CP-02").priority);

        // 无产能压力且窗口重叠: 早到期者的周期不晚于晚到期者
        let calendar = calendar();
        let start_of = |id: &str| {
            calendar
                .period_by_code(&plan_of(id).planned_period)
                .unwrap()
                .start_date
        };
        assert!(plan_of("CP-01").window_end >= plan_of("CP-02").window_start);
        assert!(start_of("CP-01") <= start_of("CP-02"));
        assert!(plan_of("CP-01").planned_date <= plan_of("CP-02").planned_date);
    }

    // ==========================================
    // 诊断
    // ==========================================

    #[tokio::test]
    async fn test_unknown_category_and_horizon_produce_diagnostics() {
        let env = setup();
        seed_crew(env.conn.clone(), "Captain", "CP", 3).unwrap();
        seed_artifacts(
            env.conn.clone(),
            &[
                PendingArtifact::new("CP-01", "Medical", d(2026, 1, 15)),
                PendingArtifact::new("CP-02", "Simulator", d(2026, 1, 15)),
                PendingArtifact::new("CP-03", "Medical", d(2027, 6, 1)),
            ],
        )
        .unwrap();

        let report = env
            .api
            .generate_renewal_plan(3, &[], false, d(2025, 11, 1))
            .await
            .unwrap();

        assert_eq!(report.plans.len(), 1);
        assert_eq!(report.plans[0].subject_id, "CP-01");

        let kinds: HashSet<(String, DiagnosticKind)> = report
            .diagnostics
            .iter()
            .map(|diag| (diag.subject_id.clone(), diag.kind))
            .collect();
        assert!(kinds.contains(&("CP-02".to_string(), DiagnosticKind::UnknownCategory)));
        assert!(kinds.contains(&("CP-03".to_string(), DiagnosticKind::HorizonExceeded)));
    }

    #[tokio::test]
    async fn test_malformed_config_fails_without_touching_ledger() {
        let env = setup();
        seed_ground_batch(&env, 3);
        let config = crew_roster_aps::config::ConfigManager::from_connection(env.conn.clone()).unwrap();
        config
            .set_config_value(config_keys::GRACE_POLICY, r#"{"Ground": {"lookahead": "3 months", "grace": 7}}"#)
            .unwrap();

        let err = env
            .api
            .generate_renewal_plan(6, &[], false, d(2025, 11, 1))
            .await
            .unwrap_err();

        assert!(err.is_config(), "unexpected error: {}", err);
        assert_eq!(ledger_total_reserved(&env), 0);
        assert!(env.api.list_plans(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_horizon_is_rejected() {
        let env = setup();
        let err = env
            .api
            .generate_renewal_plan(0, &[], false, d(2025, 11, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    // ==========================================
    // 重排: 清空 / 取代
    // ==========================================

    #[tokio::test]
    async fn test_clear_existing_regeneration_is_idempotent() {
        let env = setup();
        seed_ground_batch(&env, 5);
        let today = d(2025, 11, 1);

        let first = env.api.generate_renewal_plan(6, &[], true, today).await.unwrap();
        let second = env.api.generate_renewal_plan(6, &[], true, today).await.unwrap();

        let keys = |plans: &[crew_roster_aps::RenewalPlan]| -> Vec<_> {
            plans.iter().map(|p| p.allocation_key()).collect()
        };
        assert_eq!(keys(&first.plans), keys(&second.plans));

        let first_ids: HashSet<String> = first.plans.iter().map(|p| p.plan_id.clone()).collect();
        let cleared: HashSet<String> = second.cleared_plan_ids.iter().cloned().collect();
        assert_eq!(first_ids, cleared);

        assert_eq!(env.api.list_plans(Some(PlanStatus::Planned)).unwrap().len(), 5);
        assert_eq!(env.api.list_plans(Some(PlanStatus::Cancelled)).unwrap().len(), 5);
        assert_eq!(ledger_total_reserved(&env), 5);
    }

    #[tokio::test]
    async fn test_regeneration_supersedes_and_records_history() {
        let env = setup();
        seed_ground_batch(&env, 4);
        let today = d(2025, 11, 1);

        let first = env.api.generate_renewal_plan(6, &[], false, today).await.unwrap();
        let second = env.api.generate_renewal_plan(6, &[], false, today).await.unwrap();

        assert_eq!(second.superseded_plan_ids.len(), 4);
        assert!(second.cleared_plan_ids.is_empty());
        for plan in &first.plans {
            assert!(second.superseded_plan_ids.contains(&plan.plan_id));
        }

        // 旧计划退役, 台账不重复计数
        assert_eq!(env.api.list_plans(Some(PlanStatus::Planned)).unwrap().len(), 4);
        assert_eq!(ledger_total_reserved(&env), 4);

        let history = HistoryEventRepository::from_connection(env.conn.clone());
        assert_eq!(history.count_by_type(HistoryEventType::PlanSuperseded).unwrap(), 4);
        assert_eq!(history.count_by_type(HistoryEventType::PlanCreated).unwrap(), 8);

        let events = history
            .list_by_entity(ENTITY_RENEWAL_PLAN, &first.plans[0].plan_id)
            .unwrap();
        assert!(events.iter().any(|e| e.event_type == HistoryEventType::PlanSuperseded));
    }

    #[tokio::test]
    async fn test_confirmed_plan_is_not_rescheduled() {
        let env = setup();
        seed_ground_batch(&env, 2);
        let today = d(2025, 11, 1);

        let first = env.api.generate_renewal_plan(6, &[], false, today).await.unwrap();
        let confirmed = env.api.confirm_plan(&first.plans[0].plan_id, "planner").unwrap();
        assert_eq!(confirmed.status, PlanStatus::Confirmed);

        let second = env.api.generate_renewal_plan(6, &[], true, today).await.unwrap();
        assert_eq!(second.plans.len(), 1);
        assert_ne!(second.plans[0].subject_id, confirmed.subject_id);
        assert!(second
            .diagnostics
            .iter()
            .any(|diag| diag.subject_id == confirmed.subject_id && diag.kind == DiagnosticKind::AlreadyConfirmed));

        // 已确认计划在清空后仍占用台账
        assert_eq!(ledger_total_reserved(&env), 2);
    }

    // ==========================================
    // 生命周期
    // ==========================================

    #[tokio::test]
    async fn test_cancel_releases_capacity() {
        let env = setup();
        seed_ground_batch(&env, 2);
        let report = env
            .api
            .generate_renewal_plan(6, &[], false, d(2025, 11, 1))
            .await
            .unwrap();
        let plan = &report.plans[0];
        let before = env.api.get_utilization(&plan.planned_period, "Ground").await.unwrap();

        let cancelled = env.api.cancel_plan(&plan.plan_id, "planner", "crew change").unwrap();
        assert_eq!(cancelled.status, PlanStatus::Cancelled);

        let after = env.api.get_utilization(&plan.planned_period, "Ground").await.unwrap();
        assert!(after < before);
        assert_eq!(ledger_total_reserved(&env), 1);

        let err = env.api.cancel_plan(&plan.plan_id, "planner", "again").unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

        let err = env.api.confirm_plan(&plan.plan_id, "planner").unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_plan_is_not_found() {
        let env = setup();
        let err = env.api.confirm_plan("missing", "planner").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    // ==========================================
    // 产能查询
    // ==========================================

    #[tokio::test]
    async fn test_utilization_validates_inputs() {
        let env = setup();
        assert_eq!(env.api.get_utilization("RP3/2025", "Medical").await.unwrap(), 0.0);

        let err = env.api.get_utilization("RP99/2025", "Medical").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = env.api.get_utilization("RP3/2025", "Simulator").await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_far_future_period_code_is_invalid_input() {
        let env = setup();
        ConfigManager::from_connection(env.conn.clone())
            .unwrap()
            .set_config_value(config_keys::PERIOD_YEAR_ROLLOVER, "FIXED_CYCLE:13")
            .unwrap();

        let err = env.api.get_utilization("RP1/300000", "Medical").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)), "unexpected: {}", err);

        let err = env
            .api
            .set_period_capacity("RP13/2147483647", "Medical", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)), "unexpected: {}", err);
        assert!(CapacityLedgerRepository::from_connection(env.conn.clone())
            .load_entries()
            .unwrap()
            .is_empty());

        assert_eq!(env.api.get_utilization("RP1/2026", "Medical").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_utilization_report_covers_range() {
        let env = setup();
        seed_ground_batch(&env, 3);
        env.api
            .generate_renewal_plan(6, &[], false, d(2025, 11, 1))
            .await
            .unwrap();

        let rows = env
            .api
            .utilization_report("Ground", d(2025, 10, 10), d(2025, 12, 30))
            .await
            .unwrap();
        let codes: Vec<&str> = rows.iter().map(|r| r.period_code.as_str()).collect();
        assert_eq!(codes, vec!["RP11/2025", "RP12/2025", "RP13/2025"]);

        let rp12 = &rows[1];
        assert_eq!(rp12.reserved, 3);
        assert_eq!(rp12.capacity, 10);
        assert!((rp12.utilization - 0.3).abs() < 1e-9);
        assert_eq!(rows[0].reserved, 0);
    }

    // ==========================================
    // 分组并发
    // ==========================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_partitioned_generation_keeps_ledger_consistent() {
        let env = setup();
        let crew = seed_crew(env.conn.clone(), "Captain", "CP", 20).unwrap();
        let artifacts: Vec<PendingArtifact> = crew
            .iter()
            .enumerate()
            .map(|(i, s)| PendingArtifact::new(&s.id, "Medical", d(2026, 1, 5) + chrono::Duration::days(i as i64 * 3)))
            .collect();
        seed_artifacts(env.conn.clone(), &artifacts).unwrap();

        let report = env
            .api
            .generate_renewal_plan_partitioned(6, &[], false, d(2025, 11, 1), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.plans.len(), 20);
        for plan in &report.plans {
            assert!(plan.window().contains(plan.planned_date));
        }
        assert_eq!(ledger_total_reserved(&env), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_partitioned_generation_commits_nothing_pending() {
        let env = setup();
        seed_ground_batch(&env, 6);

        let report = env
            .api
            .generate_renewal_plan_partitioned(6, &[], false, d(2025, 11, 1), Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.plans.is_empty());
        assert_eq!(ledger_total_reserved(&env), 0);
    }
}
