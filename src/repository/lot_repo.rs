// ==========================================
// 输送带胶料库存系统 - 原材料到货批仓储
// ==========================================
// 名称匹配: 去首尾空白、大小写不敏感的精确匹配
// ==========================================

use crate::domain::batch::RawMaterialLot;
use crate::repository::error::RepositoryResult;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

fn map_lot_row(row: &Row<'_>) -> rusqlite::Result<RawMaterialLot> {
    Ok(RawMaterialLot {
        material_code: row.get(0)?,
        raw_material: row.get(1)?,
        date: row.get(2)?,
    })
}

pub struct RawMaterialLotRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RawMaterialLotRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, lot: &RawMaterialLot) -> RepositoryResult<()> {
        self.conn.execute(
            "INSERT INTO raw_material_lot (material_code, raw_material, date) VALUES (?1, ?2, ?3)",
            params![lot.material_code, lot.raw_material, lot.date],
        )?;
        Ok(())
    }

    /// 到货日期落在 [from, to] 内的同名到货批
    pub fn find_by_name_between(
        &self,
        material_name: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<RawMaterialLot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT material_code, raw_material, date
            FROM raw_material_lot
            WHERE TRIM(raw_material) = ?1 COLLATE NOCASE
              AND date >= ?2 AND date <= ?3
            ORDER BY date, material_code
            "#,
        )?;
        let lots = stmt
            .query_map(params![material_name.trim(), from, to], map_lot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lots)
    }

    /// 不限日期的同名到货批
    pub fn find_by_name(&self, material_name: &str) -> RepositoryResult<Vec<RawMaterialLot>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT material_code, raw_material, date
            FROM raw_material_lot
            WHERE TRIM(raw_material) = ?1 COLLATE NOCASE
            ORDER BY date, material_code
            "#,
        )?;
        let lots = stmt
            .query_map(params![material_name.trim()], map_lot_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    #[test]
    fn test_name_match_is_trimmed_and_case_insensitive() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let repo = RawMaterialLotRepository::new(&conn);

        let d = |m: u32, day: u32| NaiveDate::from_ymd_opt(2025, m, day).unwrap();
        repo.insert(&RawMaterialLot {
            material_code: "NR-01".to_string(),
            raw_material: "Natural Rubber ".to_string(),
            date: d(1, 5),
        })
        .unwrap();
        repo.insert(&RawMaterialLot {
            material_code: "NR-02".to_string(),
            raw_material: "natural rubber".to_string(),
            date: d(3, 5),
        })
        .unwrap();

        assert_eq!(repo.find_by_name("  NATURAL RUBBER").unwrap().len(), 2);
        assert!(repo.find_by_name("Natural").unwrap().is_empty());

        let in_window = repo
            .find_by_name_between("Natural Rubber", d(2, 1), d(3, 31))
            .unwrap();
        assert_eq!(in_window.len(), 1);
        assert_eq!(in_window[0].material_code, "NR-02");
    }
}
