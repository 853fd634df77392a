// ==========================================
// 输送带胶料库存系统 - 胶料消耗分配引擎
// ==========================================
// 规则:
// 1) 候选批次: 配方匹配、剩余库存 > 0、该类别生产日期已填写
// 2) 排序: 指定生产日期的批次优先，其余按生产日期升序（FIFO），同日按创建顺序
// 3) 贪心: 每个批次取 min(剩余, 未满足量)
// 红线: 可用总量不足时整体失败，不做部分分配
// ==========================================
// 输入: ConsumeRequest（调用方的事务连接）
// 输出: AllocationResult + 批次计数器更新 + CONSUME 台账
// ==========================================

use crate::domain::batch::{round2, BatchUsage, CompoundBatch};
use crate::domain::types::{CompoundCategory, HistoryEventType};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::history_ledger::HistoryLedger;
use crate::engine::material_resolver::MaterialResolver;
use crate::repository::{CompoundBatchRepository, CompoundMasterRepository};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 消耗请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub compound_code: String,
    pub required_kg: f64,
    pub preferred_date: NaiveDate,
    pub production_date_hint: Option<NaiveDate>,
    pub category: CompoundCategory,
    /// 消耗方（写入台账），独立调用时为空
    pub belt_id: Option<String>,
}

/// 分配结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationResult {
    pub batches_used: Vec<BatchUsage>,
    pub total_consumed: f64,
}

// ==========================================
// AllocationEngine - 消耗分配引擎
// ==========================================
pub struct AllocationEngine {
    resolver: Arc<MaterialResolver>,
}

impl AllocationEngine {
    pub fn new(resolver: Arc<MaterialResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &MaterialResolver {
        &self.resolver
    }

    /// 按 FIFO 从批次中分配消耗
    ///
    /// # 返回
    /// - Ok(AllocationResult): 各批次消耗量
    /// - Err(InsufficientInventory): 可用总量不足（未做任何写入）
    #[instrument(skip(self, conn, request), fields(
        compound_code = %request.compound_code,
        category = %request.category,
        required_kg = request.required_kg
    ))]
    pub fn consume(&self, conn: &Connection, request: &ConsumeRequest) -> EngineResult<AllocationResult> {
        let compound_code = request.compound_code.trim();
        if compound_code.is_empty() {
            return Err(EngineError::Validation("胶料编码不能为空".to_string()));
        }
        if !request.required_kg.is_finite() {
            return Err(EngineError::Validation(format!(
                "消耗量非法: {}",
                request.required_kg
            )));
        }
        let required = round2(request.required_kg);
        if required <= 0.0 {
            return Err(EngineError::Validation(format!(
                "消耗量必须大于 0: {}",
                request.required_kg
            )));
        }

        let batch_repo = CompoundBatchRepository::new(conn);
        let candidates = order_candidates(
            batch_repo.find_candidates(compound_code, request.category)?,
            request.production_date_hint,
        );

        // 先校验总量，再写入
        let available = round2(candidates.iter().map(|b| b.inventory_remaining).sum());
        if available < required {
            warn!(available, required, "可用库存不足，拒绝分配");
            return Err(EngineError::InsufficientInventory {
                compound_code: compound_code.to_string(),
                category: request.category,
                required_kg: required,
                available_kg: available,
            });
        }

        let mut result = AllocationResult::default();
        let mut outstanding = required;

        for mut batch in candidates {
            if outstanding <= 0.0 {
                break;
            }
            let take = round2(batch.inventory_remaining.min(outstanding));
            if take <= 0.0 {
                continue;
            }

            batch.inventory_remaining = round2(batch.inventory_remaining - take);
            batch.consumed = round2(batch.consumed + take);
            batch_repo.update_counters(
                &batch.batch_id,
                batch.total_inventory,
                batch.inventory_remaining,
                batch.consumed,
            )?;

            HistoryLedger::append(
                conn,
                &batch,
                HistoryEventType::Consume,
                request.belt_id.as_deref(),
                take,
                request.preferred_date,
            )?;

            self.ensure_materials_resolved(conn, &mut batch)?;

            debug!(
                batch_id = %batch.batch_id,
                take,
                closing_balance = batch.inventory_remaining,
                "批次扣减"
            );

            result.batches_used.push(BatchUsage {
                batch_id: batch.batch_id.clone(),
                consumed_kg: take,
            });
            outstanding = round2(outstanding - take);
        }

        result.total_consumed = round2(result.batches_used.iter().map(|u| u.consumed_kg).sum());
        Ok(result)
    }

    /// 回退消耗: 将每条消耗边的数量退回对应批次
    ///
    /// # 参数
    /// - belt_id: 消耗方（写入台账）
    /// - date: 台账日期上下文
    pub fn revert(
        &self,
        conn: &Connection,
        belt_id: Option<&str>,
        usages: &[BatchUsage],
        date: NaiveDate,
    ) -> EngineResult<()> {
        let batch_repo = CompoundBatchRepository::new(conn);

        for usage in usages {
            let mut batch = batch_repo.get(&usage.batch_id)?;
            let mut kg = round2(usage.consumed_kg);
            if kg > batch.consumed {
                warn!(
                    batch_id = %batch.batch_id,
                    usage_kg = kg,
                    consumed = batch.consumed,
                    "回退量超过批次已消耗量，按已消耗量回退"
                );
                kg = batch.consumed;
            }
            if kg <= 0.0 {
                continue;
            }

            batch.consumed = round2(batch.consumed - kg);
            batch.inventory_remaining = round2((batch.total_inventory - batch.consumed).max(0.0));
            batch_repo.update_counters(
                &batch.batch_id,
                batch.total_inventory,
                batch.inventory_remaining,
                batch.consumed,
            )?;

            HistoryLedger::append(conn, &batch, HistoryEventType::Revert, belt_id, kg, date)?;
        }
        Ok(())
    }

    /// 懒解析: 批次原材料批号为空或存在空批号时补齐
    ///
    /// 配方缺失只告警，不阻断分配
    pub fn ensure_materials_resolved(
        &self,
        conn: &Connection,
        batch: &mut CompoundBatch,
    ) -> EngineResult<()> {
        if !batch.materials_used.is_empty() && !batch.has_unresolved_materials() {
            return Ok(());
        }

        let target_date = batch.material_target_date();
        let changed = if batch.materials_used.is_empty() {
            let Some(master) = CompoundMasterRepository::new(conn).find_by_code(&batch.compound_code)?
            else {
                warn!(compound_code = %batch.compound_code, "配方主数据缺失，跳过物料批号解析");
                return Ok(());
            };
            if master.raw_materials.is_empty() {
                return Ok(());
            }
            batch.materials_used = self
                .resolver
                .resolve_materials(conn, &master.raw_materials, target_date)?;
            true
        } else {
            self.resolver
                .fill_unresolved(conn, &mut batch.materials_used, target_date)?
        };

        if changed {
            CompoundBatchRepository::new(conn).update_materials(&batch.batch_id, &batch.materials_used)?;
        }
        Ok(())
    }
}

/// 指定生产日期的批次前置，其余保持 FIFO 顺序（稳定排序）
fn order_candidates(
    mut candidates: Vec<CompoundBatch>,
    production_date_hint: Option<NaiveDate>,
) -> Vec<CompoundBatch> {
    if let Some(hint) = production_date_hint {
        candidates.sort_by_key(|b| b.produced_on() != Some(hint));
    }
    candidates
}
