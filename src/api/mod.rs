// ==========================================
// 输送带胶料库存系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口（事务边界 + 错误码映射）
// ==========================================

pub mod error;
pub mod inventory_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use inventory_api::{BatchPatch, BatchUpdateOutcome, InventoryApi, NewBatchInput, NewBeltInput};
