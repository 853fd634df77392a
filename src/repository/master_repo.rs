// ==========================================
// 输送带胶料库存系统 - 配方主数据仓储
// ==========================================
// 用途: 引擎只读；写入仅供初始化/导入
// ==========================================

use crate::domain::batch::CompoundMaster;
use crate::domain::types::CompoundCategory;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::json_column;
use rusqlite::{params, Connection, OptionalExtension};

pub struct CompoundMasterRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CompoundMasterRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入或替换配方主数据
    pub fn upsert(&self, master: &CompoundMaster) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO compound_master (
                compound_code, compound_name, category, raw_materials_json
            ) VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                master.compound_code,
                master.compound_name,
                master.category.to_db_str(),
                serde_json::to_string(&master.raw_materials)?,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_code(&self, compound_code: &str) -> RepositoryResult<Option<CompoundMaster>> {
        let master = self
            .conn
            .query_row(
                r#"
                SELECT compound_code, compound_name, category, raw_materials_json
                FROM compound_master
                WHERE compound_code = ?1
                "#,
                params![compound_code],
                |row| {
                    let category: String = row.get(2)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        category,
                        json_column::<Vec<String>>(3, row.get::<_, String>(3)?)?,
                    ))
                },
            )
            .optional()?;

        match master {
            None => Ok(None),
            Some((compound_code, compound_name, category, raw_materials)) => {
                let category = CompoundCategory::from_db_str(&category).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "category".to_string(),
                        message: format!("未知胶料类别: {}", category),
                    }
                })?;
                Ok(Some(CompoundMaster {
                    compound_code,
                    compound_name,
                    category,
                    raw_materials,
                }))
            }
        }
    }

    /// 按编码查询，不存在则返回 NotFound
    pub fn get(&self, compound_code: &str) -> RepositoryResult<CompoundMaster> {
        self.find_by_code(compound_code)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "CompoundMaster".to_string(),
                id: compound_code.to_string(),
            })
    }
}
