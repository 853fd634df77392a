// ==========================================
// 输送带胶料库存系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::db::open_sqlite_connection;
use crate::domain::types::ReconcileMode;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

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
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 引擎配置 =====

    /// 物料批号回溯起始窗口（月）
    pub fn get_lookback_start_months(&self) -> RepositoryResult<u32> {
        let value = self.get_config_or_default(config_keys::MATERIAL_LOOKBACK_START_MONTHS, "3")?;
        Ok(value.trim().parse::<u32>().ok().filter(|&m| m >= 1).unwrap_or(3))
    }

    /// 物料批号回溯窗口上限（月）
    pub fn get_lookback_max_months(&self) -> RepositoryResult<u32> {
        let value = self.get_config_or_default(config_keys::MATERIAL_LOOKBACK_MAX_MONTHS, "12")?;
        Ok(value.trim().parse::<u32>().ok().filter(|&m| m >= 1).unwrap_or(12))
    }

    /// 对账模式（默认 BEST_EFFORT）
    pub fn get_reconcile_mode(&self) -> RepositoryResult<ReconcileMode> {
        let value = self.get_config_or_default(config_keys::RECONCILE_MODE, "BEST_EFFORT")?;
        Ok(ReconcileMode::from_db_str(&value))
    }

    /// 批号随机挑选的种子（未配置则使用系统熵）
    pub fn get_lot_selection_seed(&self) -> RepositoryResult<Option<u64>> {
        let value = self.get_global_config_value(config_keys::LOT_SELECTION_SEED)?;
        Ok(value.and_then(|v| {
            let parsed = v.trim().parse::<u64>().ok();
            if parsed.is_none() {
                tracing::warn!(
                    config_key = config_keys::LOT_SELECTION_SEED,
                    raw_value = %v,
                    "批号挑选种子格式错误，使用系统熵"
                );
            }
            parsed
        }))
    }

    /// 汇总为引擎配置快照
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let lookback_start_months = self.get_lookback_start_months()?;
        let lookback_max_months = self.get_lookback_max_months()?.max(lookback_start_months);

        Ok(EngineConfig {
            lookback_start_months,
            lookback_max_months,
            reconcile_mode: self.get_reconcile_mode()?,
            lot_selection_seed: self.get_lot_selection_seed()?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 物料批号解析
    pub const MATERIAL_LOOKBACK_START_MONTHS: &str = "material_lookback_start_months";
    pub const MATERIAL_LOOKBACK_MAX_MONTHS: &str = "material_lookback_max_months";
    pub const LOT_SELECTION_SEED: &str = "lot_selection_seed";

    // 对账
    pub const RECONCILE_MODE: &str = "reconcile_mode";
}
