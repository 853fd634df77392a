// ==========================================
// 输送带胶料库存系统 - 批次对账引擎
// ==========================================
// 触发: 批次 batches / weight_per_batch 变更，或批次删除
// 规则:
// 1) 重算总库存；已消耗量仍能容纳时只更新计数器
// 2) 否则全量对账:
//    a. 找出引用该批次的全部输送带（按类别，每类至多一条边）
//    b. 先全部释放: 删除消耗边并把消耗量退回批次（删除场景直接丢弃）
//    c. 按压延日期升序逐条输送带重新分配原消耗量（优先日期 = 压延日期）
//    d. 新分配结果并入输送带的消耗边
// 3) 删除: 无消耗直接删除；有消耗则按总量 0 执行 2)，全部迁移成功后再删除批次及台账
//    任一输送带迁移失败则返回 ReconciliationFailed（两种对账模式相同）
// 红线: 整个过程在调用方的同一事务内；单条输送带的重新分配在 SAVEPOINT 内
// ==========================================

use crate::db::with_savepoint;
use crate::domain::batch::{round2, BatchUsage, CompoundBatch, BALANCE_TOLERANCE_KG};
use crate::domain::types::{CompoundCategory, ReconcileMode};
use crate::engine::allocation::{AllocationEngine, ConsumeRequest};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{BatchUsageRef, BeltRepository, CompoundBatchRepository};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 批次新数量
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub batches: i32,
    pub weight_per_batch: f64,
}

impl BatchTotals {
    pub fn validate(&self) -> EngineResult<()> {
        if self.batches <= 0 {
            return Err(EngineError::Validation(format!(
                "批数必须大于 0: {}",
                self.batches
            )));
        }
        if !self.weight_per_batch.is_finite() || self.weight_per_batch <= 0.0 {
            return Err(EngineError::Validation(format!(
                "单批重量必须大于 0: {}",
                self.weight_per_batch
            )));
        }
        Ok(())
    }

    pub fn total_inventory(&self) -> f64 {
        CompoundBatch::compute_total(self.batches, self.weight_per_batch)
    }
}

/// 单条输送带重新分配成功
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeltReconcileOutcome {
    pub belt_id: String,
    pub category: CompoundCategory,
    pub reverted_kg: f64,
    pub new_usages: Vec<BatchUsage>,
}

/// 单条输送带重新分配失败（消耗边已释放）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeltReconcileFailure {
    pub belt_id: String,
    pub category: CompoundCategory,
    pub required_kg: f64,
    pub reason: String,
}

/// 对账结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub batch_id: String,
    /// 是否执行了全量对账（迁移消耗方）
    pub full_reconciliation: bool,
    pub succeeded: Vec<BeltReconcileOutcome>,
    pub failed: Vec<BeltReconcileFailure>,
}

impl ReconciliationReport {
    fn counters_only(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ==========================================
// ReconciliationEngine - 对账引擎
// ==========================================
pub struct ReconciliationEngine {
    allocation: Arc<AllocationEngine>,
    mode: ReconcileMode,
}

impl ReconciliationEngine {
    pub fn new(allocation: Arc<AllocationEngine>, mode: ReconcileMode) -> Self {
        Self { allocation, mode }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// 批次数量变更后的对账
    ///
    /// # 返回
    /// - Ok((批次最新状态, 对账结果))
    /// - Err(ReconciliationFailed): STRICT 模式下存在失败的输送带
    #[instrument(skip(self, conn), fields(mode = %self.mode))]
    pub fn reconcile_batch_change(
        &self,
        conn: &Connection,
        batch_id: &str,
        new_totals: BatchTotals,
    ) -> EngineResult<(CompoundBatch, ReconciliationReport)> {
        new_totals.validate()?;

        let batch_repo = CompoundBatchRepository::new(conn);
        let batch = batch_repo.get(batch_id)?;
        let new_total = new_totals.total_inventory();

        batch_repo.update_quantities(batch_id, new_totals.batches, new_totals.weight_per_batch)?;

        // 已消耗量仍能容纳: 只更新计数器
        if batch.consumed <= new_total + BALANCE_TOLERANCE_KG / 2.0 {
            let consumed = batch.consumed.min(new_total);
            batch_repo.update_counters(batch_id, new_total, (new_total - consumed).max(0.0), consumed)?;
            info!(
                batch_id,
                new_total,
                consumed,
                "批次容量变更，消耗仍可容纳，无需迁移"
            );
            return Ok((batch_repo.get(batch_id)?, ReconciliationReport::counters_only(batch_id)));
        }

        info!(
            batch_id,
            new_total,
            consumed = batch.consumed,
            "批次容量不足以容纳已消耗量，进入全量对账"
        );

        // 先按新总量写入，剩余暂记 0，再逐条退回
        batch_repo.update_counters(batch_id, new_total, 0.0, batch.consumed)?;

        let refs = BeltRepository::new(conn).find_usages_by_batch(batch_id)?;
        self.release_all(conn, batch_id, &refs, true)?;
        self.clamp_consumed(conn, batch_id)?;

        let report = self.reallocate_all(conn, batch_id, &refs)?;
        Ok((batch_repo.get(batch_id)?, report))
    }

    /// 批次删除前的对账，成功后删除批次（台账级联删除）
    ///
    /// # 返回
    /// - Err(ReconciliationFailed): 存在无法迁移的输送带，调用方事务需回滚
    #[instrument(skip(self, conn), fields(mode = %self.mode))]
    pub fn reconcile_batch_deletion(
        &self,
        conn: &Connection,
        batch_id: &str,
    ) -> EngineResult<ReconciliationReport> {
        let batch_repo = CompoundBatchRepository::new(conn);
        let batch = batch_repo.get(batch_id)?;
        let refs = BeltRepository::new(conn).find_usages_by_batch(batch_id)?;

        if batch.consumed <= 0.0 && refs.is_empty() {
            batch_repo.delete(batch_id)?;
            info!(batch_id, "批次无消耗，直接删除");
            return Ok(ReconciliationReport::counters_only(batch_id));
        }

        // 总量视为 0: 不再作为候选批次
        batch_repo.update_counters(batch_id, 0.0, 0.0, 0.0)?;
        self.release_all(conn, batch_id, &refs, false)?;

        let report = self.reallocate_all(conn, batch_id, &refs)?;
        if !report.failed.is_empty() {
            // 任一消耗方未能迁移时批次不可删除，与对账模式无关
            warn!(
                batch_id,
                failed = report.failed.len(),
                "存在无法迁移的输送带，拒绝删除批次"
            );
            return Err(EngineError::ReconciliationFailed {
                batch_id: batch_id.to_string(),
                failed: report.failed,
            });
        }
        batch_repo.delete(batch_id)?;
        info!(
            batch_id,
            migrated = report.succeeded.len(),
            failed = report.failed.len(),
            "批次消耗迁移完成并删除"
        );
        Ok(report)
    }

    /// 释放全部引用该批次的消耗边
    ///
    /// - revert = true: 消耗量退回批次并写 REVERT 台账
    /// - revert = false: 仅丢弃消耗边（删除场景）
    fn release_all(
        &self,
        conn: &Connection,
        batch_id: &str,
        refs: &[BatchUsageRef],
        revert: bool,
    ) -> EngineResult<()> {
        let belt_repo = BeltRepository::new(conn);
        for usage_ref in refs {
            let removed = belt_repo
                .remove_usage(&usage_ref.belt_id, usage_ref.category, batch_id)?
                .unwrap_or(0.0);
            if revert && removed > 0.0 {
                self.allocation.revert(
                    conn,
                    Some(&usage_ref.belt_id),
                    &[BatchUsage {
                        batch_id: batch_id.to_string(),
                        consumed_kg: removed,
                    }],
                    usage_ref.calendaring_date,
                )?;
            }
        }
        Ok(())
    }

    /// 退回后仍超出总量的消耗（无消耗边支撑的漂移）截断到总量
    fn clamp_consumed(&self, conn: &Connection, batch_id: &str) -> EngineResult<()> {
        let batch_repo = CompoundBatchRepository::new(conn);
        let batch = batch_repo.get(batch_id)?;
        let consumed = batch.consumed.min(batch.total_inventory);
        if consumed < batch.consumed {
            warn!(
                batch_id,
                consumed = batch.consumed,
                total = batch.total_inventory,
                "释放后已消耗量仍超出总量，截断到总量"
            );
        }
        batch_repo.update_counters(
            batch_id,
            batch.total_inventory,
            (batch.total_inventory - consumed).max(0.0),
            consumed,
        )?;
        Ok(())
    }

    /// 逐条输送带重新分配
    fn reallocate_all(
        &self,
        conn: &Connection,
        batch_id: &str,
        refs: &[BatchUsageRef],
    ) -> EngineResult<ReconciliationReport> {
        let batch_repo = CompoundBatchRepository::new(conn);
        let belt_repo = BeltRepository::new(conn);
        let fallback_code = batch_repo.get(batch_id)?.compound_code;

        let mut report = ReconciliationReport {
            batch_id: batch_id.to_string(),
            full_reconciliation: true,
            ..Default::default()
        };

        for usage_ref in refs {
            let required_kg = round2(usage_ref.consumed_kg);
            let outcome = with_savepoint(conn, "reconcile_belt", || {
                let belt = belt_repo.get(&usage_ref.belt_id)?;
                let compound_code = belt
                    .compound_code(usage_ref.category)
                    .map(str::to_string)
                    .unwrap_or_else(|| fallback_code.clone());

                let allocation = self.allocation.consume(
                    conn,
                    &ConsumeRequest {
                        compound_code,
                        required_kg,
                        preferred_date: belt.calendaring_date,
                        production_date_hint: None,
                        category: usage_ref.category,
                        belt_id: Some(belt.belt_id.clone()),
                    },
                )?;
                for usage in &allocation.batches_used {
                    belt_repo.merge_usage(&belt.belt_id, usage_ref.category, usage)?;
                }
                Ok::<_, EngineError>(allocation.batches_used)
            });

            match outcome {
                Ok(new_usages) => report.succeeded.push(BeltReconcileOutcome {
                    belt_id: usage_ref.belt_id.clone(),
                    category: usage_ref.category,
                    reverted_kg: required_kg,
                    new_usages,
                }),
                Err(e) if e.is_per_item() => {
                    warn!(
                        batch_id,
                        belt_id = %usage_ref.belt_id,
                        category = %usage_ref.category,
                        required_kg,
                        error = %e,
                        "输送带重新分配失败"
                    );
                    report.failed.push(BeltReconcileFailure {
                        belt_id: usage_ref.belt_id.clone(),
                        category: usage_ref.category,
                        required_kg,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if self.mode == ReconcileMode::Strict && !report.failed.is_empty() {
            return Err(EngineError::ReconciliationFailed {
                batch_id: batch_id.to_string(),
                failed: report.failed,
            });
        }
        Ok(report)
    }
}
