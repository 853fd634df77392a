// ==========================================
// 输送带胶料库存系统 - 引擎层
// ==========================================
// 职责: 实现库存规则（分配 / 回退 / 对账 / 批号解析 / 审计）
// 红线: Engine 不拼 SQL，由仓储层访问数据；事务边界由调用方持有
// ==========================================

pub mod allocation;
pub mod audit;
pub mod date_guard;
pub mod error;
pub mod history_ledger;
pub mod material_resolver;
pub mod reconciliation;

// 重导出核心引擎
pub use allocation::{AllocationEngine, AllocationResult, ConsumeRequest};
pub use audit::{DiscrepancyKind, InventoryAuditReport, InventoryAuditor, InventoryDiscrepancy};
pub use date_guard::DateUniquenessGuard;
pub use error::{EngineError, EngineResult};
pub use history_ledger::HistoryLedger;
pub use material_resolver::MaterialResolver;
pub use reconciliation::{
    BatchTotals, BeltReconcileFailure, BeltReconcileOutcome, ReconciliationEngine,
    ReconciliationReport,
};
