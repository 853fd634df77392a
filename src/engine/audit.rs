// ==========================================
// 输送带胶料库存系统 - 库存守恒审计
// ==========================================
// 检查项:
// - 守恒: total_inventory == inventory_remaining + consumed（容差 0.01）
// - 总量: total_inventory == batches × weight_per_batch
// - 非负: inventory_remaining >= 0 且 consumed >= 0
// - 消耗边: consumed == 全部输送带对该批次的消耗量之和
// 说明: 只读，不修复
// ==========================================

use crate::domain::batch::{round2, CompoundBatch, BALANCE_TOLERANCE_KG};
use crate::engine::error::EngineResult;
use crate::repository::{BeltRepository, CompoundBatchRepository};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// 剩余 + 已消耗 != 总库存
    Conservation,
    /// 总库存 != 批数 × 单批重量
    TotalMismatch,
    NegativeRemaining,
    /// 已消耗 != 消耗边合计
    UsageMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDiscrepancy {
    pub batch_id: String,
    pub compound_code: String,
    pub kind: DiscrepancyKind,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryAuditReport {
    pub checked_batches: usize,
    pub discrepancies: Vec<InventoryDiscrepancy>,
}

impl InventoryAuditReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

pub struct InventoryAuditor;

impl InventoryAuditor {
    /// 对全部批次执行守恒审计
    pub fn audit(conn: &Connection) -> EngineResult<InventoryAuditReport> {
        let batches = CompoundBatchRepository::new(conn).list(None)?;
        let usage_sums = BeltRepository::new(conn).sum_usage_by_batch()?;

        let mut report = InventoryAuditReport {
            checked_batches: batches.len(),
            discrepancies: Vec::new(),
        };
        for batch in &batches {
            report
                .discrepancies
                .extend(check_batch(batch, &usage_sums));
        }

        if report.is_consistent() {
            info!(checked = report.checked_batches, "库存审计通过");
        } else {
            warn!(
                checked = report.checked_batches,
                discrepancies = report.discrepancies.len(),
                "库存审计发现不一致"
            );
        }
        Ok(report)
    }
}

fn check_batch(batch: &CompoundBatch, usage_sums: &HashMap<String, f64>) -> Vec<InventoryDiscrepancy> {
    let mut found = Vec::new();
    let mut push = |kind, expected: f64, actual: f64| {
        found.push(InventoryDiscrepancy {
            batch_id: batch.batch_id.clone(),
            compound_code: batch.compound_code.clone(),
            kind,
            expected: round2(expected),
            actual: round2(actual),
        })
    };

    if !batch.is_balanced() {
        push(
            DiscrepancyKind::Conservation,
            batch.total_inventory,
            batch.inventory_remaining + batch.consumed,
        );
    }

    let expected_total = CompoundBatch::compute_total(batch.batches, batch.weight_per_batch);
    if (expected_total - batch.total_inventory).abs() > BALANCE_TOLERANCE_KG {
        push(DiscrepancyKind::TotalMismatch, expected_total, batch.total_inventory);
    }

    if batch.inventory_remaining < 0.0 || batch.consumed < 0.0 {
        push(
            DiscrepancyKind::NegativeRemaining,
            0.0,
            batch.inventory_remaining.min(batch.consumed),
        );
    }

    let referenced = usage_sums.get(&batch.batch_id).copied().unwrap_or(0.0);
    if (referenced - batch.consumed).abs() > BALANCE_TOLERANCE_KG {
        push(DiscrepancyKind::UsageMismatch, referenced, batch.consumed);
    }

    found
}
