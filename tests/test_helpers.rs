// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、主数据/到货批种子、API 构造
// ==========================================
#![allow(dead_code)]

use chrono::NaiveDate;
use compound_inventory::api::{InventoryApi, NewBatchInput, NewBeltInput};
use compound_inventory::config::EngineConfig;
use compound_inventory::db::{init_schema, open_sqlite_connection};
use compound_inventory::domain::{CompoundBatch, CompoundMaster, RawMaterialLot};
use compound_inventory::domain::types::{CompoundCategory, ReconcileMode};
use compound_inventory::repository::{CompoundMasterRepository, RawMaterialLotRepository};
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 覆盖胶配方
pub const COVER_CODE: &str = "NK1";
/// 贴胶配方
pub const SKIM_CODE: &str = "SK1";

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;
    seed_masters(&conn)?;

    Ok((temp_file, db_path))
}

/// 插入默认配方（NK1 覆盖胶 / SK1 贴胶）
pub fn seed_masters(conn: &Connection) -> Result<(), Box<dyn Error>> {
    let repo = CompoundMasterRepository::new(conn);
    repo.upsert(&CompoundMaster {
        compound_code: COVER_CODE.to_string(),
        compound_name: "NK1 覆盖胶".to_string(),
        category: CompoundCategory::Cover,
        raw_materials: vec!["NR".to_string(), "Carbon Black".to_string()],
    })?;
    repo.upsert(&CompoundMaster {
        compound_code: SKIM_CODE.to_string(),
        compound_name: "SK1 贴胶".to_string(),
        category: CompoundCategory::Skim,
        raw_materials: vec!["NR".to_string()],
    })?;
    Ok(())
}

pub fn seed_master(
    conn: &Connection,
    code: &str,
    category: CompoundCategory,
    raw_materials: &[&str],
) -> Result<(), Box<dyn Error>> {
    CompoundMasterRepository::new(conn).upsert(&CompoundMaster {
        compound_code: code.to_string(),
        compound_name: code.to_string(),
        category,
        raw_materials: raw_materials.iter().map(|s| s.to_string()).collect(),
    })?;
    Ok(())
}

pub fn seed_lot(conn: &Connection, code: &str, name: &str, date: NaiveDate) -> Result<(), Box<dyn Error>> {
    RawMaterialLotRepository::new(conn).insert(&RawMaterialLot {
        material_code: code.to_string(),
        raw_material: name.to_string(),
        date,
    })?;
    Ok(())
}

/// 固定种子的引擎配置
pub fn test_config(mode: ReconcileMode) -> EngineConfig {
    EngineConfig {
        reconcile_mode: mode,
        lot_selection_seed: Some(42),
        ..EngineConfig::default()
    }
}

/// 测试环境: 临时库 + 共享连接 + API
pub struct TestEnv {
    pub api: InventoryApi,
    pub conn: Arc<Mutex<Connection>>,
    pub db_path: String,
    pub temp_file: NamedTempFile,
}

impl TestEnv {
    pub fn new(mode: ReconcileMode) -> Self {
        compound_inventory::logging::init_test();

        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));
        let api = InventoryApi::with_config(conn.clone(), test_config(mode));
        Self {
            api,
            conn,
            db_path,
            temp_file,
        }
    }

    /// 在共享连接上执行种子写入
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock().unwrap();
        f(&*conn)
    }

    /// 登记覆盖胶批次
    pub fn cover_batch(&self, date: NaiveDate, produced_on: NaiveDate, batches: i32, weight: f64) -> CompoundBatch {
        self.api
            .register_batch(NewBatchInput {
                compound_code: COVER_CODE.to_string(),
                date,
                cover_compound_produced_on: Some(produced_on),
                skim_compound_produced_on: None,
                batches,
                weight_per_batch: weight,
            })
            .unwrap()
    }

    /// 登记贴胶批次
    pub fn skim_batch(&self, date: NaiveDate, produced_on: NaiveDate, batches: i32, weight: f64) -> CompoundBatch {
        self.api
            .register_batch(NewBatchInput {
                compound_code: SKIM_CODE.to_string(),
                date,
                cover_compound_produced_on: None,
                skim_compound_produced_on: Some(produced_on),
                batches,
                weight_per_batch: weight,
            })
            .unwrap()
    }
}

/// 仅消耗覆盖胶的输送带
pub fn cover_belt(belt_number: &str, calendaring_date: NaiveDate, kg: f64) -> NewBeltInput {
    NewBeltInput {
        belt_number: belt_number.to_string(),
        calendaring_date,
        cover_compound_code: Some(COVER_CODE.to_string()),
        cover_weight_kg: kg,
        skim_compound_code: None,
        skim_weight_kg: 0.0,
        cover_production_date_hint: None,
        skim_production_date_hint: None,
    }
}
