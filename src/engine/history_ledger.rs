// ==========================================
// 输送带胶料库存系统 - 批次台账
// ==========================================
// 红线: 只追加；每次分配/回退对每个受影响批次追加一行
// 例外: 输送带日期更正时尽力回填 date，失败只记日志
// ==========================================

use crate::domain::batch::{CompoundBatch, CompoundHistory};
use crate::domain::types::HistoryEventType;
use crate::engine::error::EngineResult;
use crate::repository::CompoundHistoryRepository;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

pub struct HistoryLedger;

impl HistoryLedger {
    /// 追加一条台账
    ///
    /// # 参数
    /// - batch: 事件发生后的批次状态（closing_balance 取其剩余库存）
    pub fn append(
        conn: &Connection,
        batch: &CompoundBatch,
        event_type: HistoryEventType,
        belt_id: Option<&str>,
        quantity_kg: f64,
        date: NaiveDate,
    ) -> EngineResult<CompoundHistory> {
        let history = CompoundHistory {
            history_id: Uuid::new_v4().to_string(),
            batch_id: batch.batch_id.clone(),
            compound_code: batch.compound_code.clone(),
            event_type,
            belt_id: belt_id.map(str::to_string),
            quantity_kg,
            total_inventory: batch.total_inventory,
            consumed: batch.consumed,
            closing_balance: batch.inventory_remaining,
            date,
            created_at: Utc::now(),
        };
        CompoundHistoryRepository::new(conn).insert(&history)?;
        Ok(history)
    }

    /// 尽力回填某输送带相关台账的日期
    ///
    /// 失败不向上传播，返回 0
    pub fn backfill_dates(conn: &Connection, belt_id: &str, date: NaiveDate) -> usize {
        match CompoundHistoryRepository::new(conn).update_date_by_belt(belt_id, date) {
            Ok(rows) => {
                tracing::info!(belt_id, %date, rows, "台账日期回填完成");
                rows
            }
            Err(e) => {
                tracing::warn!(belt_id, %date, error = %e, "台账日期回填失败（忽略）");
                0
            }
        }
    }
}
