// ==========================================
// 输送带胶料库存系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod batch;
pub mod types;

// 重导出核心类型
pub use batch::{
    round2, BatchUsage, Belt, CompoundBatch, CompoundHistory, CompoundMaster, MaterialUsed,
    RawMaterialLot, BALANCE_TOLERANCE_KG,
};
pub use types::{CompoundCategory, HistoryEventType, ReconcileMode};
