// ==========================================
// 输送带胶料库存系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建库脚本与 schema_version
// - 写事务统一使用 BEGIN IMMEDIATE，避免并发分配出现重复扣减
// ==========================================

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 建库脚本
///
/// 说明：
/// - cover/skim 生产日期各自单列唯一（跨列互斥由应用层校验）
/// - belt_batch_usage.batch_id 引用 compound_batch 但不级联，批次在消耗迁移前无法删除
/// - compound_history 随批次级联删除
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS compound_master (
    compound_code TEXT PRIMARY KEY,
    compound_name TEXT NOT NULL,
    category TEXT NOT NULL CHECK (category IN ('COVER', 'SKIM')),
    raw_materials_json TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS raw_material_lot (
    material_code TEXT PRIMARY KEY,
    raw_material TEXT NOT NULL,
    date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_material_lot_name_date
    ON raw_material_lot (raw_material COLLATE NOCASE, date);

CREATE TABLE IF NOT EXISTS compound_batch (
    batch_id TEXT PRIMARY KEY,
    compound_code TEXT NOT NULL,
    compound_name TEXT NOT NULL,
    date TEXT NOT NULL UNIQUE,
    cover_compound_produced_on TEXT UNIQUE,
    skim_compound_produced_on TEXT UNIQUE,
    batches INTEGER NOT NULL,
    weight_per_batch REAL NOT NULL,
    total_inventory REAL NOT NULL,
    inventory_remaining REAL NOT NULL CHECK (inventory_remaining >= 0),
    consumed REAL NOT NULL CHECK (consumed >= 0),
    materials_used_json TEXT NOT NULL DEFAULT '[]',
    created_seq INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (cover_compound_produced_on IS NULL OR skim_compound_produced_on IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_compound_batch_code ON compound_batch (compound_code);

CREATE TABLE IF NOT EXISTS belt (
    belt_id TEXT PRIMARY KEY,
    belt_number TEXT NOT NULL UNIQUE,
    calendaring_date TEXT NOT NULL,
    cover_compound_code TEXT,
    cover_weight_kg REAL NOT NULL DEFAULT 0,
    skim_compound_code TEXT,
    skim_weight_kg REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS belt_batch_usage (
    usage_id INTEGER PRIMARY KEY AUTOINCREMENT,
    belt_id TEXT NOT NULL REFERENCES belt(belt_id) ON DELETE CASCADE,
    category TEXT NOT NULL CHECK (category IN ('COVER', 'SKIM')),
    batch_id TEXT NOT NULL REFERENCES compound_batch(batch_id),
    consumed_kg REAL NOT NULL CHECK (consumed_kg > 0)
);

CREATE INDEX IF NOT EXISTS idx_belt_batch_usage_batch ON belt_batch_usage (batch_id);
CREATE INDEX IF NOT EXISTS idx_belt_batch_usage_belt ON belt_batch_usage (belt_id, category);

CREATE TABLE IF NOT EXISTS compound_history (
    history_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES compound_batch(batch_id) ON DELETE CASCADE,
    compound_code TEXT NOT NULL,
    event_type TEXT NOT NULL,
    belt_id TEXT,
    quantity_kg REAL NOT NULL,
    total_inventory REAL NOT NULL,
    consumed REAL NOT NULL,
    closing_balance REAL NOT NULL,
    date TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_compound_history_batch ON compound_history (batch_id);
CREATE INDEX IF NOT EXISTS idx_compound_history_belt ON compound_history (belt_id);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）并写入 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
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

/// 开启写事务（BEGIN IMMEDIATE）
///
/// 写锁在事务开始时即获取，同一批次文档上的并发分配被串行化；
/// 失败方在 busy_timeout 后报错，整个事务回滚。
pub fn begin_write(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

/// 在 SAVEPOINT 中执行闭包
///
/// - 闭包成功: RELEASE
/// - 闭包失败: ROLLBACK TO + RELEASE，外层事务不受影响
pub fn with_savepoint<T, E, F>(conn: &Connection, name: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
            Err(err)
        }
    }
}
