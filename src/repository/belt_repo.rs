// ==========================================
// 输送带胶料库存系统 - 输送带及消耗边仓储
// ==========================================
// 对齐: belt / belt_batch_usage 表
// 红线: 同一输送带同一类别对同一批次至多一条消耗边
// ==========================================

use crate::domain::batch::{round2, BatchUsage, Belt};
use crate::domain::types::CompoundCategory;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

/// 某批次被引用的消耗边
#[derive(Debug, Clone, PartialEq)]
pub struct BatchUsageRef {
    pub belt_id: String,
    pub category: CompoundCategory,
    pub calendaring_date: NaiveDate,
    pub consumed_kg: f64,
}

pub struct BeltRepository<'a> {
    conn: &'a Connection,
}

impl<'a> BeltRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ==========================================
    // 输送带
    // ==========================================

    /// 插入输送带及其消耗边
    pub fn insert(&self, belt: &Belt) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO belt (
                belt_id, belt_number, calendaring_date,
                cover_compound_code, cover_weight_kg,
                skim_compound_code, skim_weight_kg,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                belt.belt_id,
                belt.belt_number,
                belt.calendaring_date,
                belt.cover_compound_code,
                round2(belt.cover_weight_kg),
                belt.skim_compound_code,
                round2(belt.skim_weight_kg),
                belt.created_at,
                belt.updated_at,
            ],
        )?;

        for category in CompoundCategory::ALL {
            for usage in belt.usages(category) {
                self.merge_usage(&belt.belt_id, category, usage)?;
            }
        }
        Ok(())
    }

    pub fn find_by_id(&self, belt_id: &str) -> RepositoryResult<Option<Belt>> {
        let belt = self
            .conn
            .query_row(
                r#"
                SELECT belt_id, belt_number, calendaring_date,
                       cover_compound_code, cover_weight_kg,
                       skim_compound_code, skim_weight_kg,
                       created_at, updated_at
                FROM belt
                WHERE belt_id = ?1
                "#,
                params![belt_id],
                |row| {
                    Ok(Belt {
                        belt_id: row.get(0)?,
                        belt_number: row.get(1)?,
                        calendaring_date: row.get(2)?,
                        cover_compound_code: row.get(3)?,
                        cover_weight_kg: row.get(4)?,
                        skim_compound_code: row.get(5)?,
                        skim_weight_kg: row.get(6)?,
                        cover_usages: Vec::new(),
                        skim_usages: Vec::new(),
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                },
            )
            .optional()?;

        let Some(mut belt) = belt else {
            return Ok(None);
        };
        belt.cover_usages = self.list_usages(belt_id, CompoundCategory::Cover)?;
        belt.skim_usages = self.list_usages(belt_id, CompoundCategory::Skim)?;
        Ok(Some(belt))
    }

    /// 按 ID 查询，不存在则返回 NotFound
    pub fn get(&self, belt_id: &str) -> RepositoryResult<Belt> {
        self.find_by_id(belt_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "Belt".to_string(),
            id: belt_id.to_string(),
        })
    }

    /// 删除输送带（消耗边随外键级联删除）
    pub fn delete(&self, belt_id: &str) -> RepositoryResult<()> {
        let rows = self
            .conn
            .execute("DELETE FROM belt WHERE belt_id = ?1", params![belt_id])?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Belt".to_string(),
                id: belt_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn update_calendaring_date(&self, belt_id: &str, date: NaiveDate) -> RepositoryResult<()> {
        let rows = self.conn.execute(
            "UPDATE belt SET calendaring_date = ?2, updated_at = ?3 WHERE belt_id = ?1",
            params![belt_id, date, Utc::now()],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Belt".to_string(),
                id: belt_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 消耗边
    // ==========================================

    pub fn list_usages(
        &self,
        belt_id: &str,
        category: CompoundCategory,
    ) -> RepositoryResult<Vec<BatchUsage>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT batch_id, consumed_kg
            FROM belt_batch_usage
            WHERE belt_id = ?1 AND category = ?2
            ORDER BY usage_id
            "#,
        )?;
        let usages = stmt
            .query_map(params![belt_id, category.to_db_str()], |row| {
                Ok(BatchUsage {
                    batch_id: row.get(0)?,
                    consumed_kg: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(usages)
    }

    /// 追加消耗边；已存在同批次的边则累加
    pub fn merge_usage(
        &self,
        belt_id: &str,
        category: CompoundCategory,
        usage: &BatchUsage,
    ) -> RepositoryResult<()> {
        let existing: Option<(i64, f64)> = self
            .conn
            .query_row(
                r#"
                SELECT usage_id, consumed_kg FROM belt_batch_usage
                WHERE belt_id = ?1 AND category = ?2 AND batch_id = ?3
                "#,
                params![belt_id, category.to_db_str(), usage.batch_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((usage_id, kg)) => {
                self.conn.execute(
                    "UPDATE belt_batch_usage SET consumed_kg = ?2 WHERE usage_id = ?1",
                    params![usage_id, round2(kg + usage.consumed_kg)],
                )?;
            }
            None => {
                self.conn.execute(
                    r#"
                    INSERT INTO belt_batch_usage (belt_id, category, batch_id, consumed_kg)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![
                        belt_id,
                        category.to_db_str(),
                        usage.batch_id,
                        round2(usage.consumed_kg)
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// 移除输送带对某批次的消耗边，返回被移除的消耗量
    pub fn remove_usage(
        &self,
        belt_id: &str,
        category: CompoundCategory,
        batch_id: &str,
    ) -> RepositoryResult<Option<f64>> {
        let removed: Option<f64> = self
            .conn
            .query_row(
                r#"
                SELECT SUM(consumed_kg) FROM belt_batch_usage
                WHERE belt_id = ?1 AND category = ?2 AND batch_id = ?3
                "#,
                params![belt_id, category.to_db_str(), batch_id],
                |row| row.get(0),
            )?;
        self.conn.execute(
            "DELETE FROM belt_batch_usage WHERE belt_id = ?1 AND category = ?2 AND batch_id = ?3",
            params![belt_id, category.to_db_str(), batch_id],
        )?;
        Ok(removed)
    }

    /// 引用某批次的全部消耗边（按压延日期、输送带升序）
    pub fn find_usages_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<BatchUsageRef>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT u.belt_id, u.category, b.calendaring_date, SUM(u.consumed_kg)
            FROM belt_batch_usage u
            JOIN belt b ON b.belt_id = u.belt_id
            WHERE u.batch_id = ?1
            GROUP BY u.belt_id, u.category
            ORDER BY b.calendaring_date, b.created_at, u.belt_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![batch_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, NaiveDate>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(belt_id, category, calendaring_date, consumed_kg)| {
                let category = CompoundCategory::from_db_str(&category).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "category".to_string(),
                        message: format!("未知胶料类别: {}", category),
                    }
                })?;
                Ok(BatchUsageRef {
                    belt_id,
                    category,
                    calendaring_date,
                    consumed_kg: round2(consumed_kg),
                })
            })
            .collect()
    }

    /// 各批次被消耗边引用的总量（用于守恒审计）
    pub fn sum_usage_by_batch(&self) -> RepositoryResult<HashMap<String, f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT batch_id, SUM(consumed_kg) FROM belt_batch_usage GROUP BY batch_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(batch_id, kg)| (batch_id, round2(kg)))
            .collect())
    }
}
