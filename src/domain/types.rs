// ==========================================
// 输送带胶料库存系统 - 领域类型定义
// ==========================================
// 职责: 胶料类别、台账事件类型、对账模式
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 胶料类别 (Compound Category)
// ==========================================
// 红线: 覆盖胶与贴胶互斥,一条输送带两类消耗分别记账
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompoundCategory {
    Cover, // 覆盖胶
    Skim,  // 贴胶
}

impl CompoundCategory {
    pub const ALL: [CompoundCategory; 2] = [CompoundCategory::Cover, CompoundCategory::Skim];

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "COVER" => Some(CompoundCategory::Cover),
            "SKIM" => Some(CompoundCategory::Skim),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CompoundCategory::Cover => "COVER",
            CompoundCategory::Skim => "SKIM",
        }
    }

    /// 该类别对应的"胶料生产日期"列名
    pub fn produced_on_column(&self) -> &'static str {
        match self {
            CompoundCategory::Cover => "cover_compound_produced_on",
            CompoundCategory::Skim => "skim_compound_produced_on",
        }
    }
}

impl fmt::Display for CompoundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 台账事件类型 (History Event Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventType {
    Consume, // 消耗
    Revert,  // 回退
}

impl HistoryEventType {
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CONSUME" => Some(HistoryEventType::Consume),
            "REVERT" => Some(HistoryEventType::Revert),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            HistoryEventType::Consume => "CONSUME",
            HistoryEventType::Revert => "REVERT",
        }
    }
}

impl fmt::Display for HistoryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 对账模式 (Reconcile Mode)
// ==========================================
// BEST_EFFORT: 单条输送带重新分配失败时记录并继续
// STRICT: 任一输送带失败则整体回滚
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileMode {
    #[default]
    BestEffort,
    Strict,
}

impl ReconcileMode {
    /// 从配置值解析,未知值回退为 BEST_EFFORT
    pub fn from_db_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "STRICT" => ReconcileMode::Strict,
            _ => ReconcileMode::BestEffort,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ReconcileMode::BestEffort => "BEST_EFFORT",
            ReconcileMode::Strict => "STRICT",
        }
    }
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_db_round_trip() {
        for category in CompoundCategory::ALL {
            assert_eq!(
                CompoundCategory::from_db_str(category.to_db_str()),
                Some(category)
            );
        }
        assert_eq!(CompoundCategory::from_db_str(" cover "), Some(CompoundCategory::Cover));
        assert_eq!(CompoundCategory::from_db_str("fabric"), None);
    }

    #[test]
    fn test_reconcile_mode_defaults_to_best_effort() {
        assert_eq!(ReconcileMode::from_db_str("strict"), ReconcileMode::Strict);
        assert_eq!(ReconcileMode::from_db_str("whatever"), ReconcileMode::BestEffort);
        assert_eq!(ReconcileMode::default(), ReconcileMode::BestEffort);
    }
}
