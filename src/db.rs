// ==========================================
// 机组排班核心 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表 (CREATE TABLE IF NOT EXISTS)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "CREW_ROSTER_APS_DB_PATH";

/// 默认数据库路径
///
/// 优先级: 环境变量 > 用户数据目录 > 当前目录
pub fn default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./crew_roster_aps.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("crew-roster-aps");
        // 目录创建失败时回落到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("crew_roster_aps.db");
        }
    }
    path.to_string_lossy().to_string()
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS config_kv (
    scope_id   TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS subject (
    subject_id       TEXT PRIMARY KEY,
    rank             TEXT NOT NULL,
    seniority_number INTEGER NOT NULL,
    active           INTEGER NOT NULL DEFAULT 1,
    UNIQUE (rank, seniority_number)
);

CREATE TABLE IF NOT EXISTS pending_artifact (
    subject_id  TEXT NOT NULL REFERENCES subject(subject_id),
    category    TEXT NOT NULL,
    expiry_date TEXT NOT NULL,
    PRIMARY KEY (subject_id, category)
);

CREATE TABLE IF NOT EXISTS renewal_plan (
    plan_id         TEXT PRIMARY KEY,
    subject_id      TEXT NOT NULL,
    category        TEXT NOT NULL,
    original_expiry TEXT NOT NULL,
    window_start    TEXT NOT NULL,
    window_end      TEXT NOT NULL,
    planned_period  TEXT NOT NULL,
    planned_date    TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    overflow        INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL CHECK (status IN ('PLANNED', 'CONFIRMED', 'CANCELLED')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    CHECK (window_start <= planned_date AND planned_date <= window_end)
);
CREATE INDEX IF NOT EXISTS idx_renewal_plan_subject
    ON renewal_plan (subject_id, category, status);
CREATE INDEX IF NOT EXISTS idx_renewal_plan_period
    ON renewal_plan (planned_period, category);

CREATE TABLE IF NOT EXISTS capacity_ledger (
    period_code TEXT NOT NULL,
    category    TEXT NOT NULL,
    capacity    INTEGER NOT NULL CHECK (capacity >= 0),
    reserved    INTEGER NOT NULL DEFAULT 0 CHECK (reserved >= 0),
    overflow    INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (period_code, category),
    CHECK (reserved <= capacity OR overflow = 1)
);

CREATE TABLE IF NOT EXISTS leave_request (
    request_id      TEXT PRIMARY KEY,
    subject_id      TEXT NOT NULL REFERENCES subject(subject_id),
    rank            TEXT NOT NULL,
    start_date      TEXT NOT NULL,
    end_date        TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'APPROVED', 'DENIED', 'CONFLICT')),
    decided_at      TEXT,
    conflict_with   TEXT NOT NULL DEFAULT '[]',
    decision_reason TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_leave_request_rank
    ON leave_request (rank, status, start_date, end_date);

CREATE TABLE IF NOT EXISTS history_event (
    event_id     TEXT PRIMARY KEY,
    event_type   TEXT NOT NULL,
    entity_type  TEXT NOT NULL,
    entity_id    TEXT NOT NULL,
    occurred_at  TEXT NOT NULL,
    actor        TEXT NOT NULL,
    payload_json TEXT,
    detail       TEXT
);
CREATE INDEX IF NOT EXISTS idx_history_event_entity
    ON history_event (entity_type, entity_id, occurred_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// 幂等建表并登记 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    if let Some(version) = read_schema_version(conn)? {
        if version != CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                found = version,
                expected = CURRENT_SCHEMA_VERSION,
                "schema_version 与当前代码不一致"
            );
        }
    }
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_default_db_path_ends_with_db() {
        let path = default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_ledger_rejects_silent_overflow() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO capacity_ledger (period_code, category, capacity, reserved, overflow)
             VALUES ('RP12/2025', 'Ground', 8, 9, 0)",
            [],
        );
        assert!(err.is_err());
    }
}
