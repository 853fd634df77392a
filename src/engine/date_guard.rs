// ==========================================
// 输送带胶料库存系统 - 胶料生产日期唯一性守卫
// ==========================================
// 红线: 一个日历日期只能作为"覆盖胶生产日期"或"贴胶生产日期"之一，
//       且在所有批次中至多出现一次
// 说明: 数据库对两列各自建唯一索引，跨列互斥只能由此处在事务内校验
// ==========================================

use crate::engine::error::{EngineError, EngineResult};
use crate::repository::CompoundBatchRepository;
use chrono::NaiveDate;
use rusqlite::Connection;

pub struct DateUniquenessGuard;

impl DateUniquenessGuard {
    /// 写入前校验
    ///
    /// # 参数
    /// - exclude_batch_id: 更新时排除自身
    /// - cover_on / skim_on: 本次要写入的生产日期
    ///
    /// # 返回
    /// - Err(Validation): 两个日期同时填写
    /// - Err(Conflict): 日期已被其它批次使用（任一列）
    pub fn check(
        conn: &Connection,
        exclude_batch_id: Option<&str>,
        cover_on: Option<NaiveDate>,
        skim_on: Option<NaiveDate>,
    ) -> EngineResult<()> {
        if cover_on.is_some() && skim_on.is_some() {
            return Err(EngineError::Validation(
                "覆盖胶生产日期与贴胶生产日期不能同时填写".to_string(),
            ));
        }

        let Some(date) = cover_on.or(skim_on) else {
            return Ok(());
        };

        let hits = CompoundBatchRepository::new(conn).find_produced_on_hits(date, exclude_batch_id)?;
        if let Some(hit) = hits.first() {
            return Err(EngineError::Conflict(format!(
                "胶料生产日期 {} 已被批次 {} 用作 {} 生产日期",
                date, hit.batch_id, hit.category
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::batch::CompoundBatch;
    use chrono::Utc;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        CompoundBatchRepository::new(&conn)
            .insert(&CompoundBatch {
                batch_id: "A".to_string(),
                compound_code: "NK1".to_string(),
                compound_name: "NK1".to_string(),
                date: d(10),
                cover_compound_produced_on: Some(d(1)),
                skim_compound_produced_on: None,
                batches: 1,
                weight_per_batch: 100.0,
                total_inventory: 100.0,
                inventory_remaining: 100.0,
                consumed: 0.0,
                materials_used: vec![],
                created_seq: 1,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();
        conn
    }

    #[test]
    fn test_cross_field_collision_is_conflict() {
        let conn = setup();
        let err = DateUniquenessGuard::check(&conn, None, None, Some(d(1))).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn test_same_field_collision_is_conflict() {
        let conn = setup();
        let err = DateUniquenessGuard::check(&conn, None, Some(d(1)), None).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn test_self_is_excluded_on_update() {
        let conn = setup();
        assert!(DateUniquenessGuard::check(&conn, Some("A"), Some(d(1)), None).is_ok());
        assert!(DateUniquenessGuard::check(&conn, Some("A"), None, Some(d(1))).is_ok());
    }

    #[test]
    fn test_both_dates_rejected_and_none_allowed() {
        let conn = setup();
        assert!(matches!(
            DateUniquenessGuard::check(&conn, None, Some(d(2)), Some(d(3))),
            Err(EngineError::Validation(_))
        ));
        assert!(DateUniquenessGuard::check(&conn, None, None, None).is_ok());
        assert!(DateUniquenessGuard::check(&conn, None, Some(d(2)), None).is_ok());
    }
}
