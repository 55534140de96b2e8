// ==========================================
// 请假准入 API 集成测试
// ==========================================
// 覆盖: 最低配员、资历裁决与重放、授权越权、
//       职级隔离、参数校验、历史事件
// ==========================================


#[cfg(test)]
mod eligibility_api_test {
    use std::sync::{Arc, Mutex};

    use chrono::{NaiveDate, Utc};
    use crew_roster_aps::api::{ApiError, EligibilityApi};
    use crew_roster_aps::config::ConfigManager;
    use crew_roster_aps::domain::history::HistoryEventType;
    use crew_roster_aps::domain::{LeaveRequest, OverrideAuthorization, Subject};
    use crew_roster_aps::engine::REASON_INSUFFICIENT_CREW;
    use crew_roster_aps::repository::{
        HistoryEventRepository, LeaveRequestRepository, SubjectRepository,
    };
    use crew_roster_aps::{DecisionOutcome, LeaveStatus};
    use rusqlite::Connection;
    use tempfile::NamedTempFile;

    use crate::test_helpers::{
        create_test_db, d, insert_test_config, seed_crew, set_minimum_crew, shared_conn,
    };

    // ==========================================
    // 测试辅助函数
    // ==========================================

    struct TestEnv {
        _temp_file: NamedTempFile,
        conn: Arc<Mutex<Connection>>,
        config: ConfigManager,
        api: EligibilityApi,
    }

    async fn setup(minimum_table: &str) -> TestEnv {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = shared_conn(&db_path);
        let config = insert_test_config(conn.clone()).unwrap();
        set_minimum_crew(&config, minimum_table).unwrap();
        let api = EligibilityApi::from_connection(conn.clone()).await.unwrap();
        TestEnv {
            _temp_file: temp_file,
            conn,
            config,
            api,
        }
    }

    fn leave_start() -> NaiveDate {
        d(2026, 1, 10)
    }

    fn leave_end() -> NaiveDate {
        d(2026, 1, 20)
    }

    /// 写入一条已批准请假 (外部历史数据)
    fn seed_approved_leave(env: &TestEnv, request_id: &str, subject: &Subject, start: NaiveDate, end: NaiveDate) {
        let mut request = LeaveRequest::pending(request_id, subject, start, end);
        request.status = LeaveStatus::Approved;
        request.decided_at = Some(Utc::now());
        LeaveRequestRepository::from_connection(env.conn.clone())
            .insert(&request)
            .unwrap();
    }

    // ==========================================
    // 最低配员
    // ==========================================

    #[tokio::test]
    async fn test_request_denied_when_remaining_below_minimum() {
        // Captain 最低 10 人, 在岗 11 人, 已有一条重叠批准请假
        let env = setup(r#"{"Captain": 10}"#).await;
        let crew = seed_crew(env.conn.clone(), "Captain", "CP", 11).unwrap();
        seed_approved_leave(&env, "L-APPROVED", &crew[10], d(2026, 1, 5), d(2026, 1, 12));

        let senior = env
            .api
            .submit_request(Some("L-SENIOR"), "CP-02", leave_start(), leave_end())
            .unwrap();
        env.api
            .submit_request(Some("L-JUNIOR"), "CP-05", leave_start(), leave_end())
            .unwrap();

        let decision = env.api.decide_request(&senior.request_id, None).await.unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Denied);
        assert_eq!(decision.snapshot.total_active, 11);
        assert_eq!(decision.snapshot.available, 10);
        assert_eq!(decision.remaining_if_approved, 9);
        assert!(decision.reason.starts_with(REASON_INSUFFICIENT_CREW));

        let junior = env.api.decide_request("L-JUNIOR", None).await.unwrap();
        assert_eq!(junior.outcome, DecisionOutcome::Denied);
        assert_eq!(env.api.get_request("L-SENIOR").unwrap().status, LeaveStatus::Denied);
    }

    #[tokio::test]
    async fn test_senior_request_wins_over_junior() {
        // 在岗 12 人: 只能再批准一人
        let env = setup(r#"{"Captain": 10}"#).await;
        let crew = seed_crew(env.conn.clone(), "Captain", "CP", 12).unwrap();
        seed_approved_leave(&env, "L-APPROVED", &crew[11], d(2026, 1, 5), d(2026, 1, 12));

        env.api
            .submit_request(Some("L-SENIOR"), "CP-02", leave_start(), leave_end())
            .unwrap();
        env.api
            .submit_request(Some("L-JUNIOR"), "CP-05", leave_start(), leave_end())
            .unwrap();

        // 资浅者先裁决: 资深者仍未决, 让位为 CONFLICT
        let junior = env.api.decide_request("L-JUNIOR", None).await.unwrap();
        assert_eq!(junior.outcome, DecisionOutcome::Conflict);
        assert_eq!(junior.conflict_with, vec!["L-SENIOR".to_string()]);

        let senior = env.api.decide_request("L-SENIOR", None).await.unwrap();
        assert_eq!(senior.outcome, DecisionOutcome::Approved);
        assert_eq!(senior.remaining_if_approved, 10);

        // 重放: 名额已被资深者占用
        let replayed = env.api.replay_conflicts("Captain").await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].request_id.as_deref(), Some("L-JUNIOR"));
        assert_ne!(replayed[0].outcome, DecisionOutcome::Approved);

        let approved = env
            .api
            .list_requests("Captain", Some(LeaveStatus::Approved))
            .unwrap();
        let approved_ids: Vec<&str> = approved.iter().map(|r| r.request_id.as_str()).collect();
        assert!(approved_ids.contains(&"L-SENIOR"));
        assert!(!approved_ids.contains(&"L-JUNIOR"));
    }

    #[tokio::test]
    async fn test_junior_yields_to_pending_senior_even_with_room() {
        // 在岗 20 人 / 最低 10: 名额足够两人, 资浅者仍须等待
        let env = setup(r#"{"Captain": 10}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 20).unwrap();
        env.api
            .submit_request(Some("L-SENIOR"), "CP-03", leave_start(), leave_end())
            .unwrap();
        env.api
            .submit_request(Some("L-JUNIOR"), "CP-08", d(2026, 1, 15), d(2026, 1, 25))
            .unwrap();

        let junior = env.api.decide_request("L-JUNIOR", None).await.unwrap();
        assert_eq!(junior.outcome, DecisionOutcome::Conflict);
        assert_eq!(junior.conflict_with, vec!["L-SENIOR".to_string()]);
        assert_eq!(env.api.get_request("L-JUNIOR").unwrap().status, LeaveStatus::Conflict);

        let senior = env.api.decide_request("L-SENIOR", None).await.unwrap();
        assert!(senior.is_approved());

        // CONFLICT 不能通过交互裁决重新处理
        let err = env.api.decide_request("L-JUNIOR", None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(env.api.get_request("L-JUNIOR").unwrap().status, LeaveStatus::Conflict);

        let replayed = env.api.replay_conflicts("Captain").await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].request_id.as_deref(), Some("L-JUNIOR"));
        assert!(replayed[0].is_approved());
        assert_eq!(replayed[0].snapshot.committed, 1);
    }

    #[tokio::test]
    async fn test_replay_decides_in_seniority_order() {
        let env = setup(r#"{"Captain": 10}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 11).unwrap();

        env.api
            .submit_request(Some("L-C"), "CP-07", leave_start(), leave_end())
            .unwrap();
        env.api
            .submit_request(Some("L-A"), "CP-03", leave_start(), leave_end())
            .unwrap();

        let decisions = env.api.replay_conflicts("Captain").await.unwrap();
        let order: Vec<&str> = decisions.iter().map(|d| d.subject_id.as_str()).collect();
        assert_eq!(order, vec!["CP-03", "CP-07"]);
        assert_eq!(decisions[0].outcome, DecisionOutcome::Approved);
        assert_eq!(decisions[1].outcome, DecisionOutcome::Denied);
    }

    #[tokio::test]
    async fn test_check_does_not_commit() {
        let env = setup(r#"{"Captain": 10}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 12).unwrap();
        let request = env
            .api
            .submit_request(None, "CP-04", leave_start(), leave_end())
            .unwrap();
        assert!(!request.request_id.is_empty());

        let decision = env
            .api
            .check_leave_eligibility("CP-04", leave_start(), leave_end(), Some(&request.request_id))
            .await
            .unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Approved);
        assert_eq!(decision.request_id.as_deref(), Some(request.request_id.as_str()));

        let stored = env.api.get_request(&request.request_id).unwrap();
        assert_eq!(stored.status, LeaveStatus::Pending);
        assert!(stored.decided_at.is_none());
    }

    #[tokio::test]
    async fn test_ranks_are_evaluated_independently() {
        let env = setup(r#"{"Captain": 2, "FirstOfficer": 2}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 3).unwrap();
        let officers = seed_crew(env.conn.clone(), "FirstOfficer", "FO", 3).unwrap();
        seed_approved_leave(&env, "L-FO", &officers[0], leave_start(), leave_end());

        env.api
            .submit_request(Some("L-CP"), "CP-01", leave_start(), leave_end())
            .unwrap();
        let decision = env.api.decide_request("L-CP", None).await.unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Approved);
        assert_eq!(decision.snapshot.committed, 0);
    }

    #[tokio::test]
    async fn test_inactive_subjects_are_not_counted() {
        let env = setup(r#"{"Captain": 2}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 3).unwrap();
        SubjectRepository::from_connection(env.conn.clone())
            .upsert(&Subject {
                id: "CP-03".to_string(),
                rank: "Captain".to_string(),
                seniority_number: 3,
                active: false,
            })
            .unwrap();

        let decision = env
            .api
            .check_leave_eligibility("CP-01", leave_start(), leave_end(), None)
            .await
            .unwrap();
        assert_eq!(decision.snapshot.total_active, 2);
        assert_eq!(decision.outcome, DecisionOutcome::Denied);

        let err = env
            .api
            .submit_request(None, "CP-03", leave_start(), leave_end())
            .unwrap_err();
        assert!(matches!(err, ApiError::BusinessRuleViolation(_)));
    }

    // ==========================================
    // 授权越权批准
    // ==========================================

    #[tokio::test]
    async fn test_override_approves_below_minimum_and_records_history() {
        let env = setup(r#"{"Captain": 10}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 10).unwrap();
        env.api
            .submit_request(Some("L-OVR"), "CP-01", leave_start(), leave_end())
            .unwrap();

        let auth = OverrideAuthorization {
            authorized_by: "chief-pilot".to_string(),
            reason: "medical emergency".to_string(),
        };
        let decision = env.api.decide_request("L-OVR", Some(&auth)).await.unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Approved);
        assert!(decision.override_applied);
        assert_eq!(decision.remaining_if_approved, 9);

        let history = HistoryEventRepository::from_connection(env.conn.clone());
        assert_eq!(history.count_by_type(HistoryEventType::LeaveOverride).unwrap(), 1);
        assert_eq!(history.count_by_type(HistoryEventType::LeaveDecided).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_override_requires_authorizer_and_reason() {
        let env = setup(r#"{"Captain": 10}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 10).unwrap();
        env.api
            .submit_request(Some("L-OVR"), "CP-01", leave_start(), leave_end())
            .unwrap();

        let auth = OverrideAuthorization {
            authorized_by: " ".to_string(),
            reason: "n/a".to_string(),
        };
        let err = env.api.decide_request("L-OVR", Some(&auth)).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(env.api.get_request("L-OVR").unwrap().status, LeaveStatus::Pending);
    }

    // ==========================================
    // 参数与状态校验
    // ==========================================

    #[tokio::test]
    async fn test_invalid_date_range_is_rejected() {
        let env = setup(r#"{"Captain": 1}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 3).unwrap();

        let err = env
            .api
            .submit_request(None, "CP-01", leave_end(), leave_start())
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = env
            .api
            .check_leave_eligibility("CP-01", leave_start(), leave_start(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_decided_request_cannot_be_decided_again() {
        let env = setup(r#"{"Captain": 1}"#).await;
        seed_crew(env.conn.clone(), "Captain", "CP", 3).unwrap();
        env.api
            .submit_request(Some("L-1"), "CP-01", leave_start(), leave_end())
            .unwrap();

        let first = env.api.decide_request("L-1", None).await.unwrap();
        assert!(first.is_approved());

        let err = env.api.decide_request("L-1", None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let history = HistoryEventRepository::from_connection(env.conn.clone());
        assert_eq!(history.count_by_type(HistoryEventType::LeaveDecided).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_rank_minimum_is_config_error() {
        let env = setup(r#"{"Captain": 1}"#).await;
        seed_crew(env.conn.clone(), "Engineer", "EN", 3).unwrap();

        let err = env
            .api
            .check_leave_eligibility("EN-01", leave_start(), leave_end(), None)
            .await
            .unwrap_err();
        assert!(err.is_config());

        set_minimum_crew(&env.config, r#"{"Captain": 1, "Engineer": 1}"#).unwrap();
        let decision = env
            .api
            .check_leave_eligibility("EN-01", leave_start(), leave_end(), None)
            .await
            .unwrap();
        assert!(decision.is_approved());
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let env = setup(r#"{"Captain": 1}"#).await;
        let err = env.api.decide_request("missing", None).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
