// ==========================================
// 输送带胶料库存系统 - 胶料批次领域模型
// ==========================================
// 职责: 批次、配方主数据、原材料到货批、输送带消耗边、台账
// 红线: inventory_remaining + consumed == total_inventory, inventory_remaining >= 0
// ==========================================

use crate::domain::types::{CompoundCategory, HistoryEventType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 库存守恒校验容差（kg）
pub const BALANCE_TOLERANCE_KG: f64 = 0.01;

/// 四舍五入到 2 位小数（-0.0 归一为 0.0）
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0 + 0.0
}

// ==========================================
// MaterialUsed - 批次所用原材料批号
// ==========================================
// material_code 为空串表示未解析（需人工跟进）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialUsed {
    pub material_name: String,
    pub material_code: String,
}

impl MaterialUsed {
    pub fn is_resolved(&self) -> bool {
        !self.material_code.trim().is_empty()
    }
}

// ==========================================
// CompoundBatch - 胶料批次
// ==========================================
// 对齐: compound_batch 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundBatch {
    // ===== 主键 =====
    pub batch_id: String,

    // ===== 配方 =====
    pub compound_code: String,
    pub compound_name: String,

    // ===== 日期 =====
    pub date: NaiveDate, // 投入输送带生产的日期（自然键，唯一）
    pub cover_compound_produced_on: Option<NaiveDate>,
    pub skim_compound_produced_on: Option<NaiveDate>,

    // ===== 数量（kg）=====
    pub batches: i32,
    pub weight_per_batch: f64,
    pub total_inventory: f64,
    pub inventory_remaining: f64,
    pub consumed: f64,

    // ===== 原材料追溯 =====
    pub materials_used: Vec<MaterialUsed>,

    // ===== 审计字段 =====
    pub created_seq: i64, // 创建顺序（同日期批次的次级排序键）
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompoundBatch {
    /// 总库存 = 批数 × 单批重量（保留 2 位小数）
    pub fn compute_total(batches: i32, weight_per_batch: f64) -> f64 {
        round2(batches as f64 * weight_per_batch)
    }

    /// 按生产日期字段推断批次类别
    pub fn category(&self) -> Option<CompoundCategory> {
        match (self.cover_compound_produced_on, self.skim_compound_produced_on) {
            (Some(_), None) => Some(CompoundCategory::Cover),
            (None, Some(_)) => Some(CompoundCategory::Skim),
            _ => None,
        }
    }

    /// 胶料生产日期（覆盖胶或贴胶其一）
    pub fn produced_on(&self) -> Option<NaiveDate> {
        self.cover_compound_produced_on
            .or(self.skim_compound_produced_on)
    }

    /// 原材料批号解析的目标日期: 胶料生产日期，未填写时取投产日期
    pub fn material_target_date(&self) -> NaiveDate {
        self.produced_on().unwrap_or(self.date)
    }

    /// 守恒校验: remaining + consumed == total 且 remaining >= 0
    pub fn is_balanced(&self) -> bool {
        self.inventory_remaining >= 0.0
            && (self.inventory_remaining + self.consumed - self.total_inventory).abs()
                <= BALANCE_TOLERANCE_KG
    }

    /// 是否存在未解析的原材料批号
    pub fn has_unresolved_materials(&self) -> bool {
        self.materials_used.iter().any(|m| !m.is_resolved())
    }
}

// ==========================================
// CompoundMaster - 胶料配方主数据（只读）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundMaster {
    pub compound_code: String,
    pub compound_name: String,
    pub category: CompoundCategory,
    pub raw_materials: Vec<String>, // 原材料名称（无批号）
}

// ==========================================
// RawMaterialLot - 原材料到货批
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMaterialLot {
    pub material_code: String,
    pub raw_material: String,
    pub date: NaiveDate, // 到货日期
}

// ==========================================
// BatchUsage - 输送带对批次的消耗边
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUsage {
    pub batch_id: String,
    pub consumed_kg: f64,
}

// ==========================================
// Belt - 消耗方（输送带）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Belt {
    pub belt_id: String,
    pub belt_number: String,
    pub calendaring_date: NaiveDate, // 压延日期（重新分配时的优先日期）

    pub cover_compound_code: Option<String>,
    pub cover_weight_kg: f64,
    pub skim_compound_code: Option<String>,
    pub skim_weight_kg: f64,

    pub cover_usages: Vec<BatchUsage>,
    pub skim_usages: Vec<BatchUsage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Belt {
    pub fn usages(&self, category: CompoundCategory) -> &[BatchUsage] {
        match category {
            CompoundCategory::Cover => &self.cover_usages,
            CompoundCategory::Skim => &self.skim_usages,
        }
    }

    pub fn compound_code(&self, category: CompoundCategory) -> Option<&str> {
        match category {
            CompoundCategory::Cover => self.cover_compound_code.as_deref(),
            CompoundCategory::Skim => self.skim_compound_code.as_deref(),
        }
    }

    pub fn required_kg(&self, category: CompoundCategory) -> f64 {
        match category {
            CompoundCategory::Cover => self.cover_weight_kg,
            CompoundCategory::Skim => self.skim_weight_kg,
        }
    }

    /// 该类别已分配的总量
    pub fn allocated_kg(&self, category: CompoundCategory) -> f64 {
        round2(self.usages(category).iter().map(|u| u.consumed_kg).sum())
    }
}

// ==========================================
// CompoundHistory - 批次台账（只追加）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundHistory {
    pub history_id: String,
    pub batch_id: String,
    pub compound_code: String,
    pub event_type: HistoryEventType,
    pub belt_id: Option<String>,
    pub quantity_kg: f64,
    pub total_inventory: f64,
    pub consumed: f64,
    pub closing_balance: f64, // 事件发生后的剩余库存
    pub date: NaiveDate,      // 日期上下文（输送带压延日期）
    pub created_at: DateTime<Utc>,
}
