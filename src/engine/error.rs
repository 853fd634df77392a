// ==========================================
// 输送带胶料库存系统 - 引擎层错误类型
// ==========================================
// 分类: 校验 / 库存不足 / 冲突 / 未找到 / 对账失败 / 存储
// ==========================================

use crate::domain::types::CompoundCategory;
use crate::engine::reconciliation::BeltReconcileFailure;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 输入形状/范围错误，任何写入之前拒绝
    #[error("数据验证失败: {0}")]
    Validation(String),

    /// 可用库存不足，事务回滚，不做部分分配
    #[error(
        "库存不足: 胶料 {compound_code} ({category}) 需要 {required_kg:.2} kg，可用仅 {available_kg:.2} kg"
    )]
    InsufficientInventory {
        compound_code: String,
        category: CompoundCategory,
        required_kg: f64,
        available_kg: f64,
    },

    /// 日期唯一性 / 自然键冲突
    #[error("数据冲突: {0}")]
    Conflict(String),

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    /// STRICT 模式下存在无法重新分配的输送带
    #[error("对账失败: batch_id={batch_id}, 失败输送带数={}", .failed.len())]
    ReconciliationFailed {
        batch_id: String,
        failed: Vec<BeltReconcileFailure>,
    },

    #[error(transparent)]
    Repository(RepositoryError),
}

impl EngineError {
    /// 是否属于可按单条输送带隔离的业务错误（对账 BEST_EFFORT 模式下记录并继续）
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientInventory { .. }
                | EngineError::NotFound { .. }
                | EngineError::Validation(_)
                | EngineError::Conflict(_)
        )
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::UniqueConstraintViolation(msg) => EngineError::Conflict(msg),
            other => EngineError::Repository(other),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        RepositoryError::from(err).into()
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
