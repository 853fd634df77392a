// ==========================================
// 输送带胶料库存系统 - 胶料批次仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 仓储借用调用方的连接/事务，由引擎层决定事务边界
// ==========================================

use crate::domain::batch::{round2, CompoundBatch, MaterialUsed};
use crate::domain::types::CompoundCategory;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::json_column;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const BATCH_COLUMNS: &str = r#"
    batch_id, compound_code, compound_name, date,
    cover_compound_produced_on, skim_compound_produced_on,
    batches, weight_per_batch, total_inventory, inventory_remaining, consumed,
    materials_used_json, created_seq, created_at, updated_at
"#;

fn map_batch_row(row: &Row<'_>) -> rusqlite::Result<CompoundBatch> {
    Ok(CompoundBatch {
        batch_id: row.get(0)?,
        compound_code: row.get(1)?,
        compound_name: row.get(2)?,
        date: row.get(3)?,
        cover_compound_produced_on: row.get(4)?,
        skim_compound_produced_on: row.get(5)?,
        batches: row.get(6)?,
        weight_per_batch: row.get(7)?,
        total_inventory: row.get(8)?,
        inventory_remaining: row.get(9)?,
        consumed: row.get(10)?,
        materials_used: json_column(11, row.get::<_, String>(11)?)?,
        created_seq: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// 生产日期冲突命中记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedOnHit {
    pub batch_id: String,
    pub category: CompoundCategory,
}

// ==========================================
// CompoundBatchRepository - 胶料批次仓储
// ==========================================
pub struct CompoundBatchRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CompoundBatchRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入批次
    pub fn insert(&self, batch: &CompoundBatch) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO compound_batch (
                batch_id, compound_code, compound_name, date,
                cover_compound_produced_on, skim_compound_produced_on,
                batches, weight_per_batch, total_inventory, inventory_remaining, consumed,
                materials_used_json, created_seq, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                batch.batch_id,
                batch.compound_code,
                batch.compound_name,
                batch.date,
                batch.cover_compound_produced_on,
                batch.skim_compound_produced_on,
                batch.batches,
                batch.weight_per_batch,
                round2(batch.total_inventory),
                round2(batch.inventory_remaining),
                round2(batch.consumed),
                serde_json::to_string(&batch.materials_used)?,
                batch.created_seq,
                batch.created_at,
                batch.updated_at,
            ],
        )?;
        Ok(())
    }

    /// 下一个创建序号
    pub fn next_created_seq(&self) -> RepositoryResult<i64> {
        let seq: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(created_seq), 0) + 1 FROM compound_batch",
            [],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// 更新批次的可编辑字段（不含数量与计数器）
    pub fn update_attributes(&self, batch: &CompoundBatch) -> RepositoryResult<()> {
        let rows = self.conn.execute(
            r#"
            UPDATE compound_batch SET
                compound_name = ?2,
                date = ?3,
                cover_compound_produced_on = ?4,
                skim_compound_produced_on = ?5,
                updated_at = ?6
            WHERE batch_id = ?1
            "#,
            params![
                batch.batch_id,
                batch.compound_name,
                batch.date,
                batch.cover_compound_produced_on,
                batch.skim_compound_produced_on,
                Utc::now(),
            ],
        )?;
        ensure_touched(rows, &batch.batch_id)
    }

    /// 更新批数与单批重量（计数器由对账引擎单独写入）
    pub fn update_quantities(
        &self,
        batch_id: &str,
        batches: i32,
        weight_per_batch: f64,
    ) -> RepositoryResult<()> {
        let rows = self.conn.execute(
            "UPDATE compound_batch SET batches = ?2, weight_per_batch = ?3, updated_at = ?4 WHERE batch_id = ?1",
            params![batch_id, batches, weight_per_batch, Utc::now()],
        )?;
        ensure_touched(rows, batch_id)
    }

    /// 更新库存计数器（统一保留 2 位小数）
    pub fn update_counters(
        &self,
        batch_id: &str,
        total_inventory: f64,
        inventory_remaining: f64,
        consumed: f64,
    ) -> RepositoryResult<()> {
        let rows = self.conn.execute(
            r#"
            UPDATE compound_batch SET
                total_inventory = ?2,
                inventory_remaining = ?3,
                consumed = ?4,
                updated_at = ?5
            WHERE batch_id = ?1
            "#,
            params![
                batch_id,
                round2(total_inventory),
                round2(inventory_remaining),
                round2(consumed),
                Utc::now(),
            ],
        )?;
        ensure_touched(rows, batch_id)
    }

    /// 回写原材料批号
    pub fn update_materials(&self, batch_id: &str, materials: &[MaterialUsed]) -> RepositoryResult<()> {
        let rows = self.conn.execute(
            "UPDATE compound_batch SET materials_used_json = ?2, updated_at = ?3 WHERE batch_id = ?1",
            params![batch_id, serde_json::to_string(materials)?, Utc::now()],
        )?;
        ensure_touched(rows, batch_id)
    }

    /// 删除批次（台账随外键级联删除）
    pub fn delete(&self, batch_id: &str) -> RepositoryResult<()> {
        let rows = self
            .conn
            .execute("DELETE FROM compound_batch WHERE batch_id = ?1", params![batch_id])?;
        ensure_touched(rows, batch_id)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<CompoundBatch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM compound_batch WHERE batch_id = ?1");
        let batch = self
            .conn
            .query_row(&sql, params![batch_id], map_batch_row)
            .optional()?;
        Ok(batch)
    }

    /// 按 ID 查询，不存在则返回 NotFound
    pub fn get(&self, batch_id: &str) -> RepositoryResult<CompoundBatch> {
        self.find_by_id(batch_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "CompoundBatch".to_string(),
            id: batch_id.to_string(),
        })
    }

    /// 按自然键（投产日期）查询
    pub fn find_by_date(&self, date: NaiveDate) -> RepositoryResult<Option<CompoundBatch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM compound_batch WHERE date = ?1");
        let batch = self
            .conn
            .query_row(&sql, params![date], map_batch_row)
            .optional()?;
        Ok(batch)
    }

    /// 批次列表（可按配方过滤），按创建顺序
    pub fn list(&self, compound_code: Option<&str>) -> RepositoryResult<Vec<CompoundBatch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM compound_batch
             WHERE (?1 IS NULL OR compound_code = ?1)
             ORDER BY created_seq"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![compound_code], map_batch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    /// 分配候选批次
    ///
    /// 条件: 配方匹配、剩余库存 > 0、该类别的生产日期已填写
    /// 排序: 生产日期升序（FIFO），同日按创建顺序
    pub fn find_candidates(
        &self,
        compound_code: &str,
        category: CompoundCategory,
    ) -> RepositoryResult<Vec<CompoundBatch>> {
        let column = category.produced_on_column();
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM compound_batch
             WHERE compound_code = ?1
               AND inventory_remaining > 0
               AND {column} IS NOT NULL
             ORDER BY {column} ASC, created_seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![compound_code], map_batch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    /// 查找任一生产日期列等于 date 的其它批次
    pub fn find_produced_on_hits(
        &self,
        date: NaiveDate,
        exclude_batch_id: Option<&str>,
    ) -> RepositoryResult<Vec<ProducedOnHit>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT batch_id,
                   CASE WHEN cover_compound_produced_on = ?1 THEN 'COVER' ELSE 'SKIM' END
            FROM compound_batch
            WHERE (cover_compound_produced_on = ?1 OR skim_compound_produced_on = ?1)
              AND (?2 IS NULL OR batch_id <> ?2)
            "#,
        )?;
        let hits = stmt
            .query_map(params![date, exclude_batch_id], |row| {
                let category: String = row.get(1)?;
                Ok(ProducedOnHit {
                    batch_id: row.get(0)?,
                    category: CompoundCategory::from_db_str(&category)
                        .unwrap_or(CompoundCategory::Skim),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hits)
    }
}

fn ensure_touched(rows: usize, batch_id: &str) -> RepositoryResult<()> {
    if rows == 0 {
        return Err(RepositoryError::NotFound {
            entity: "CompoundBatch".to_string(),
            id: batch_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn make_batch(id: &str, seq: i64, day: u32, cover_on: Option<u32>, skim_on: Option<u32>) -> CompoundBatch {
        let d = |day: u32| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        CompoundBatch {
            batch_id: id.to_string(),
            compound_code: "NK1".to_string(),
            compound_name: "NK1".to_string(),
            date: d(day),
            cover_compound_produced_on: cover_on.map(d),
            skim_compound_produced_on: skim_on.map(d),
            batches: 10,
            weight_per_batch: 90.0,
            total_inventory: 900.0,
            inventory_remaining: 900.0,
            consumed: 0.0,
            materials_used: vec![],
            created_seq: seq,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_find_by_id() {
        let conn = setup_test_db();
        let repo = CompoundBatchRepository::new(&conn);

        repo.insert(&make_batch("B1", 1, 10, Some(5), None)).unwrap();

        let found = repo.find_by_id("B1").unwrap().unwrap();
        assert_eq!(found.compound_code, "NK1");
        assert_eq!(found.total_inventory, 900.0);
        assert_eq!(found.category(), Some(CompoundCategory::Cover));
        assert!(repo.find_by_id("missing").unwrap().is_none());
        assert!(matches!(
            repo.get("missing"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_candidates_are_fifo_and_category_filtered() {
        let conn = setup_test_db();
        let repo = CompoundBatchRepository::new(&conn);

        repo.insert(&make_batch("LATE", 1, 10, Some(8), None)).unwrap();
        repo.insert(&make_batch("EARLY", 2, 11, Some(3), None)).unwrap();
        repo.insert(&make_batch("SKIM", 3, 12, None, Some(1))).unwrap();
        let mut empty = make_batch("EMPTY", 4, 13, Some(2), None);
        empty.inventory_remaining = 0.0;
        empty.consumed = 900.0;
        repo.insert(&empty).unwrap();

        let ids: Vec<String> = repo
            .find_candidates("NK1", CompoundCategory::Cover)
            .unwrap()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(ids, vec!["EARLY".to_string(), "LATE".to_string()]);
    }

    #[test]
    fn test_unique_produced_on_column_is_enforced() {
        let conn = setup_test_db();
        let repo = CompoundBatchRepository::new(&conn);

        repo.insert(&make_batch("B1", 1, 10, Some(5), None)).unwrap();
        let err = repo.insert(&make_batch("B2", 2, 11, Some(5), None)).unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
    }

    #[test]
    fn test_produced_on_hits_cover_both_columns() {
        let conn = setup_test_db();
        let repo = CompoundBatchRepository::new(&conn);

        repo.insert(&make_batch("B1", 1, 10, Some(5), None)).unwrap();
        repo.insert(&make_batch("B2", 2, 11, None, Some(6))).unwrap();

        let d5 = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let d6 = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();

        let hits = repo.find_produced_on_hits(d5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, CompoundCategory::Cover);

        let hits = repo.find_produced_on_hits(d6, None).unwrap();
        assert_eq!(hits[0].batch_id, "B2");
        assert_eq!(hits[0].category, CompoundCategory::Skim);

        assert!(repo.find_produced_on_hits(d5, Some("B1")).unwrap().is_empty());
    }

    #[test]
    fn test_update_counters_rounds_values() {
        let conn = setup_test_db();
        let repo = CompoundBatchRepository::new(&conn);
        repo.insert(&make_batch("B1", 1, 10, Some(5), None)).unwrap();

        repo.update_counters("B1", 900.0, 599.996, 300.004).unwrap();
        let found = repo.get("B1").unwrap();
        assert_eq!(found.inventory_remaining, 600.0);
        assert_eq!(found.consumed, 300.0);

        assert!(repo.update_counters("missing", 1.0, 1.0, 0.0).is_err());
    }
}
