// ==========================================
// 输送带胶料库存系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 说明: 仓储借用 &Connection（事务可经 Deref 传入），事务边界由上层控制
// ==========================================

pub mod batch_repo;
pub mod belt_repo;
pub mod error;
pub mod history_repo;
pub mod lot_repo;
pub mod master_repo;

// 重导出核心仓储
pub use batch_repo::{CompoundBatchRepository, ProducedOnHit};
pub use belt_repo::{BatchUsageRef, BeltRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use history_repo::CompoundHistoryRepository;
pub use lot_repo::RawMaterialLotRepository;
pub use master_repo::CompoundMasterRepository;

use serde::de::DeserializeOwned;

/// 解析 JSON 文本列
pub(crate) fn json_column<T: DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
