// ==========================================
// 输送带胶料库存系统 - 命令行入口
// ==========================================
// 用法:
//   compound-inventory [db_path]
//
// 打开（必要时创建）数据库，执行库存守恒审计并列出待跟进批次。
// 存在不一致时以退出码 1 结束。
// ==========================================

use compound_inventory::app::{get_default_db_path, AppState};
use compound_inventory::logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", compound_inventory::APP_NAME, compound_inventory::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)?;
    let api = &state.inventory_api;

    let report = api.audit_inventory()?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let unresolved = api.list_unresolved_material_batches()?;
    for batch in &unresolved {
        let missing: Vec<&str> = batch
            .materials_used
            .iter()
            .filter(|m| !m.is_resolved())
            .map(|m| m.material_name.as_str())
            .collect();
        println!(
            "待跟进: batch_id={} compound_code={} 未解析原材料={:?}",
            batch.batch_id, batch.compound_code, missing
        );
    }

    if !report.is_consistent() {
        tracing::warn!(discrepancies = report.discrepancies.len(), "库存审计未通过");
        std::process::exit(1);
    }
    Ok(())
}
