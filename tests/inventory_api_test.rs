// ==========================================
// InventoryApi 集成测试
// ==========================================
// 测试目标: 批次登记/修改校验、日期唯一性、物料批号追溯、日期更正、配置加载
// ==========================================

mod test_helpers;

use compound_inventory::api::{ApiError, BatchPatch, InventoryApi, NewBatchInput};
use compound_inventory::config::{config_keys, ConfigManager};
use compound_inventory::db::open_sqlite_connection;
use compound_inventory::domain::types::{CompoundCategory, ReconcileMode};
use std::sync::{Arc, Mutex};
use test_helpers::{cover_belt, d, seed_lot, seed_master, test_config, TestEnv, COVER_CODE, SKIM_CODE};

fn batch_input(code: &str, date: chrono::NaiveDate) -> NewBatchInput {
    NewBatchInput {
        compound_code: code.to_string(),
        date,
        cover_compound_produced_on: None,
        skim_compound_produced_on: None,
        batches: 10,
        weight_per_batch: 90.0,
    }
}

// ==========================================
// 日期唯一性
// ==========================================

#[test]
fn test_produced_on_date_cannot_be_reused_across_categories() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 10, 90.0);

    let mut input = batch_input(SKIM_CODE, d(2025, 3, 6));
    input.skim_compound_produced_on = Some(d(2025, 3, 1));
    let err = env.api.register_batch(input).unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    assert_eq!(err.status_code(), 409);
    assert_eq!(env.api.list_batches(None).unwrap().len(), 1);
}

#[test]
fn test_same_category_date_and_natural_key_conflicts() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let a = env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 10, 90.0);
    let b = env.cover_batch(d(2025, 3, 6), d(2025, 3, 2), 10, 90.0);

    let mut input = batch_input(COVER_CODE, d(2025, 3, 7));
    input.cover_compound_produced_on = Some(d(2025, 3, 1));
    assert!(matches!(env.api.register_batch(input), Err(ApiError::Conflict(_))));

    // 投产日期（自然键）重复
    assert!(matches!(
        env.api.register_batch(batch_input(COVER_CODE, d(2025, 3, 5))),
        Err(ApiError::Conflict(_))
    ));

    // 修改为其它批次的生产日期
    let patch = BatchPatch {
        cover_compound_produced_on: Some(Some(d(2025, 3, 1))),
        ..BatchPatch::default()
    };
    assert!(matches!(
        env.api.update_batch(&b.batch_id, patch),
        Err(ApiError::Conflict(_))
    ));

    // 保留自身日期不算冲突
    let patch = BatchPatch {
        cover_compound_produced_on: Some(Some(d(2025, 3, 1))),
        compound_name: Some("NK1 改名".to_string()),
        ..BatchPatch::default()
    };
    let outcome = env.api.update_batch(&a.batch_id, patch).unwrap();
    assert_eq!(outcome.batch.compound_name, "NK1 改名");
    assert!(outcome.reconciliation.is_none());
}

#[test]
fn test_both_produced_on_dates_is_validation_error() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let mut input = batch_input(COVER_CODE, d(2025, 3, 5));
    input.cover_compound_produced_on = Some(d(2025, 3, 1));
    input.skim_compound_produced_on = Some(d(2025, 3, 2));

    let err = env.api.register_batch(input).unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
    assert_eq!(err.status_code(), 400);
}

// ==========================================
// 批次登记 / 修改校验
// ==========================================

#[test]
fn test_register_validates_master_and_category() {
    let env = TestEnv::new(ReconcileMode::BestEffort);

    let err = env.api.register_batch(batch_input("NOPE", d(2025, 3, 5))).unwrap_err();
    assert_eq!(err.status_code(), 404);

    let mut input = batch_input(COVER_CODE, d(2025, 3, 5));
    input.skim_compound_produced_on = Some(d(2025, 3, 1));
    assert!(matches!(
        env.api.register_batch(input),
        Err(ApiError::ValidationError(_))
    ));

    let mut input = batch_input(COVER_CODE, d(2025, 3, 5));
    input.batches = 0;
    assert_eq!(env.api.register_batch(input).unwrap_err().status_code(), 400);

    assert!(env.api.list_batches(None).unwrap().is_empty());
}

#[test]
fn test_register_sets_counters_and_name_from_master() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let batch = env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 3, 83.333);

    assert_eq!(batch.compound_name, "NK1 覆盖胶");
    assert_eq!(batch.total_inventory, 250.0);
    assert_eq!(batch.inventory_remaining, 250.0);
    assert_eq!(batch.consumed, 0.0);
    assert_eq!(batch.category(), Some(CompoundCategory::Cover));
    assert!(batch.is_balanced());
}

#[test]
fn test_category_change_rejected_once_consumed() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let a = env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 10, 90.0);
    env.api
        .record_belt_consumption(cover_belt("X", d(2025, 3, 10), 100.0))
        .unwrap();

    let patch = BatchPatch {
        cover_compound_produced_on: Some(None),
        ..BatchPatch::default()
    };
    let err = env.api.update_batch(&a.batch_id, patch).unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
    assert_eq!(
        env.api.get_batch(&a.batch_id).unwrap().cover_compound_produced_on,
        Some(d(2025, 3, 1))
    );
}

#[test]
fn test_belt_input_validation() {
    let env = TestEnv::new(ReconcileMode::BestEffort);

    let mut input = cover_belt("X", d(2025, 3, 10), 10.0);
    input.cover_compound_code = None;
    assert_eq!(env.api.record_belt_consumption(input).unwrap_err().status_code(), 400);

    let input = cover_belt("  ", d(2025, 3, 10), 10.0);
    assert!(matches!(
        env.api.record_belt_consumption(input),
        Err(ApiError::InvalidInput(_))
    ));

    // 同编号输送带
    env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 10, 90.0);
    env.api
        .record_belt_consumption(cover_belt("DUP", d(2025, 3, 10), 10.0))
        .unwrap();
    let err = env
        .api
        .record_belt_consumption(cover_belt("DUP", d(2025, 3, 11), 10.0))
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

// ==========================================
// 物料批号追溯
// ==========================================

#[test]
fn test_unresolved_materials_are_filled_lazily_on_consumption() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    env.with_conn(|conn| seed_lot(conn, "NR-01", "NR", d(2025, 1, 1))).unwrap();

    let batch = env.cover_batch(d(2025, 2, 5), d(2025, 2, 1), 10, 90.0);
    assert_eq!(batch.materials_used.len(), 2);
    assert_eq!(batch.materials_used[0].material_code, "NR-01");
    assert_eq!(batch.materials_used[1].material_name, "Carbon Black");
    assert!(!batch.materials_used[1].is_resolved());

    let unresolved = env.api.list_unresolved_material_batches().unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].batch_id, batch.batch_id);

    env.with_conn(|conn| seed_lot(conn, "CB-01", "carbon black", d(2025, 1, 15)))
        .unwrap();
    env.api
        .record_belt_consumption(cover_belt("X", d(2025, 2, 10), 50.0))
        .unwrap();

    let batch = env.api.get_batch(&batch.batch_id).unwrap();
    assert_eq!(batch.materials_used[0].material_code, "NR-01");
    assert_eq!(batch.materials_used[1].material_code, "CB-01");
    assert!(env.api.list_unresolved_material_batches().unwrap().is_empty());
}

#[test]
fn test_produced_on_change_re_resolves_materials() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    env.with_conn(|conn| {
        seed_lot(conn, "NR-NEW", "NR", d(2025, 2, 15))?;
        seed_lot(conn, "NR-OLD", "NR", d(2024, 5, 1))?;
        seed_lot(conn, "CB-ANY", "Carbon Black", d(2024, 5, 10))
    })
    .unwrap();

    let batch = env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 10, 90.0);
    assert_eq!(batch.materials_used[0].material_code, "NR-NEW");
    // 窗口逐月扩展后命中
    assert_eq!(batch.materials_used[1].material_code, "CB-ANY");

    let patch = BatchPatch {
        cover_compound_produced_on: Some(Some(d(2024, 6, 1))),
        ..BatchPatch::default()
    };
    let outcome = env.api.update_batch(&batch.batch_id, patch).unwrap();
    assert_eq!(outcome.batch.materials_used[0].material_code, "NR-OLD");
    assert_eq!(outcome.batch.materials_used[1].material_code, "CB-ANY");
}

#[test]
fn test_date_change_re_resolves_materials_without_produced_on() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    env.with_conn(|conn| {
        seed_lot(conn, "NR-2025", "NR", d(2025, 2, 1))?;
        seed_lot(conn, "NR-2026", "NR", d(2026, 2, 1))
    })
    .unwrap();

    // 未填写生产日期: 以投产日期为目标日期
    let batch = env.api.register_batch(batch_input(COVER_CODE, d(2025, 3, 5))).unwrap();
    assert_eq!(batch.materials_used[0].material_code, "NR-2025");

    let patch = BatchPatch {
        date: Some(d(2026, 3, 5)),
        ..BatchPatch::default()
    };
    let outcome = env.api.update_batch(&batch.batch_id, patch).unwrap();
    assert_eq!(outcome.batch.date, d(2026, 3, 5));
    assert_eq!(outcome.batch.materials_used[0].material_code, "NR-2026");
    assert_eq!(outcome.batch.materials_used[1].material_name, "Carbon Black");
}

#[test]
fn test_master_without_raw_materials_yields_empty_list() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    env.with_conn(|conn| seed_master(conn, "BARE", CompoundCategory::Cover, &[]))
        .unwrap();

    let batch = env.api.register_batch(batch_input("BARE", d(2025, 3, 5))).unwrap();
    assert!(batch.materials_used.is_empty());
    assert!(env.api.list_unresolved_material_batches().unwrap().is_empty());
}

#[test]
fn test_resolve_material_code() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    env.with_conn(|conn| seed_lot(conn, "ZN-01", "Zinc Oxide", d(2025, 1, 1)))
        .unwrap();

    assert_eq!(
        env.api.resolve_material_code(" zinc oxide ", d(2025, 2, 1)).unwrap(),
        "ZN-01"
    );
    assert_eq!(env.api.resolve_material_code("Sulfur", d(2025, 2, 1)).unwrap(), "");
}

// ==========================================
// 输送带日期更正
// ==========================================

#[test]
fn test_correct_belt_date_backfills_history() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let a = env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 1, 100.0);
    let b = env.cover_batch(d(2025, 3, 6), d(2025, 3, 2), 1, 100.0);
    let x = env
        .api
        .record_belt_consumption(cover_belt("X", d(2025, 3, 10), 150.0))
        .unwrap();

    let rows = env.api.correct_belt_date(&x.belt_id, d(2025, 3, 12)).unwrap();
    assert_eq!(rows, 2);

    assert_eq!(env.api.get_belt(&x.belt_id).unwrap().calendaring_date, d(2025, 3, 12));
    for id in [&a.batch_id, &b.batch_id] {
        let history = env.api.list_history(id).unwrap();
        assert!(history.iter().all(|h| h.date == d(2025, 3, 12)));
    }

    assert_eq!(
        env.api.correct_belt_date("missing", d(2025, 3, 12)).unwrap_err().status_code(),
        404
    );
}

// ==========================================
// 配置与并发
// ==========================================

#[test]
fn test_engine_config_is_loaded_from_config_kv() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let manager = ConfigManager::from_connection(env.conn.clone()).unwrap();
    manager
        .set_global_config_value(config_keys::RECONCILE_MODE, "STRICT")
        .unwrap();
    manager
        .set_global_config_value(config_keys::MATERIAL_LOOKBACK_START_MONTHS, "1")
        .unwrap();
    manager
        .set_global_config_value(config_keys::LOT_SELECTION_SEED, "7")
        .unwrap();

    let api = InventoryApi::new(env.conn.clone()).unwrap();
    assert_eq!(api.config().reconcile_mode, ReconcileMode::Strict);
    assert_eq!(api.config().lookback_start_months, 1);
    assert_eq!(api.config().lookback_max_months, 12);
    assert_eq!(api.config().lot_selection_seed, Some(7));
}

#[test]
fn test_concurrent_consumption_is_serialized() {
    let env = TestEnv::new(ReconcileMode::BestEffort);
    let a = env.cover_batch(d(2025, 3, 5), d(2025, 3, 1), 10, 90.0);

    std::thread::scope(|scope| {
        for worker in 0..2 {
            let db_path = env.db_path.clone();
            scope.spawn(move || {
                let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));
                let api = InventoryApi::with_config(conn, test_config(ReconcileMode::BestEffort));
                for i in 0..10 {
                    api.record_belt_consumption(cover_belt(
                        &format!("W{worker}-{i}"),
                        d(2025, 3, 10),
                        10.0,
                    ))
                    .unwrap();
                }
            });
        }
    });

    let a = env.api.get_batch(&a.batch_id).unwrap();
    assert_eq!(a.consumed, 200.0);
    assert_eq!(a.inventory_remaining, 700.0);
    assert_eq!(env.api.list_history(&a.batch_id).unwrap().len(), 20);
    assert!(env.api.audit_inventory().unwrap().is_consistent());
}
