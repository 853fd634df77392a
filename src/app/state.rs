// ==========================================
// 输送带胶料库存系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::InventoryApi;
use crate::db::{init_schema, open_sqlite_connection, read_schema_version};

/// 应用状态
///
/// 包含共享连接上的全部API实例
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 库存API
    pub inventory_api: Arc<InventoryApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并应用统一 PRAGMA
    /// 2. 建表（幂等）
    /// 3. 从 config_kv 加载引擎配置并创建 API
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        match read_schema_version(&conn) {
            Ok(version) => tracing::info!(?version, "数据库 schema 版本"),
            Err(e) => tracing::warn!("读取 schema 版本失败(将继续启动): {}", e),
        }
        let conn = Arc::new(Mutex::new(conn));

        let inventory_api = Arc::new(
            InventoryApi::new(conn).map_err(|e| format!("无法创建InventoryApi: {}", e))?,
        );

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            inventory_api,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 COMPOUND_INVENTORY_DB_PATH（非空时优先）
/// - 开发环境: 用户数据目录/compound-inventory-dev/compound_inventory.db
/// - 生产环境: 用户数据目录/compound-inventory/compound_inventory.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("COMPOUND_INVENTORY_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./compound_inventory.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("compound-inventory-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("compound-inventory");
        }

        // 目录创建失败时由打开数据库报错
        std::fs::create_dir_all(&path).ok();
        path = path.join("compound_inventory.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_app_state_initializes_schema() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let db_path = temp.path().to_string_lossy().to_string();

        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.get_db_path(), db_path);

        let report = state.inventory_api.audit_inventory().unwrap();
        assert_eq!(report.checked_batches, 0);
    }
}
