// ==========================================
// 输送带胶料库存系统 - 引擎配置快照
// ==========================================

use crate::domain::types::ReconcileMode;
use serde::{Deserialize, Serialize};

/// 引擎配置（InventoryApi 构造时由 ConfigManager 读取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 物料批号回溯起始窗口（月）
    pub lookback_start_months: u32,
    /// 物料批号回溯窗口上限（月），超过后改为不限日期查询
    pub lookback_max_months: u32,
    /// 对账模式
    pub reconcile_mode: ReconcileMode,
    /// 批号随机挑选的种子
    pub lot_selection_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback_start_months: 3,
            lookback_max_months: 12,
            reconcile_mode: ReconcileMode::BestEffort,
            lot_selection_seed: None,
        }
    }
}
