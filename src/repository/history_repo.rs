// ==========================================
// 输送带胶料库存系统 - 批次台账仓储
// ==========================================
// 红线: 只追加；唯一允许的更新是 date 回填
// ==========================================

use crate::domain::batch::{round2, CompoundHistory};
use crate::domain::types::HistoryEventType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

pub struct CompoundHistoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CompoundHistoryRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, history: &CompoundHistory) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO compound_history (
                history_id, batch_id, compound_code, event_type, belt_id,
                quantity_kg, total_inventory, consumed, closing_balance,
                date, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                history.history_id,
                history.batch_id,
                history.compound_code,
                history.event_type.to_db_str(),
                history.belt_id,
                round2(history.quantity_kg),
                round2(history.total_inventory),
                round2(history.consumed),
                round2(history.closing_balance),
                history.date,
                history.created_at,
            ],
        )?;
        Ok(())
    }

    /// 某批次台账（按写入顺序）
    pub fn list_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<CompoundHistory>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT history_id, batch_id, compound_code, event_type, belt_id,
                   quantity_kg, total_inventory, consumed, closing_balance,
                   date, created_at
            FROM compound_history
            WHERE batch_id = ?1
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt
            .query_map(params![batch_id], |row| {
                let event_type: String = row.get(3)?;
                Ok((
                    event_type,
                    CompoundHistory {
                        history_id: row.get(0)?,
                        batch_id: row.get(1)?,
                        compound_code: row.get(2)?,
                        event_type: HistoryEventType::Consume,
                        belt_id: row.get(4)?,
                        quantity_kg: row.get(5)?,
                        total_inventory: row.get(6)?,
                        consumed: row.get(7)?,
                        closing_balance: row.get(8)?,
                        date: row.get(9)?,
                        created_at: row.get(10)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(event_type, mut history)| {
                history.event_type = HistoryEventType::from_db_str(&event_type).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "event_type".to_string(),
                        message: format!("未知台账事件类型: {}", event_type),
                    }
                })?;
                Ok(history)
            })
            .collect()
    }

    /// 回填某输送带相关台账的日期，返回更新行数
    pub fn update_date_by_belt(&self, belt_id: &str, date: NaiveDate) -> RepositoryResult<usize> {
        let rows = self.conn.execute(
            "UPDATE compound_history SET date = ?2 WHERE belt_id = ?1",
            params![belt_id, date],
        )?;
        Ok(rows)
    }

    pub fn count_by_batch(&self, batch_id: &str) -> RepositoryResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM compound_history WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
