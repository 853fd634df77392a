// ==========================================
// 输送带胶料库存系统 - 库存 API
// ==========================================
// 职责: 批次登记/修改/删除、输送带消耗登记/释放、查询与审计
// 红线: 每个写操作一个 BEGIN IMMEDIATE 事务，出错整体回滚
// ==========================================

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::ConfigManager;
use crate::config::EngineConfig;
use crate::db::begin_write;
use crate::domain::batch::{
    round2, Belt, CompoundBatch, CompoundHistory, CompoundMaster, MaterialUsed,
};
use crate::domain::types::CompoundCategory;
use crate::engine::{
    AllocationEngine, BatchTotals, ConsumeRequest, DateUniquenessGuard, HistoryLedger,
    InventoryAuditReport, InventoryAuditor, MaterialResolver, ReconciliationEngine,
    ReconciliationReport,
};
use crate::repository::{
    BeltRepository, CompoundBatchRepository, CompoundHistoryRepository, CompoundMasterRepository,
};

// ==========================================
// 请求 / 响应结构
// ==========================================

/// 批次登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatchInput {
    pub compound_code: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub cover_compound_produced_on: Option<NaiveDate>,
    #[serde(default)]
    pub skim_compound_produced_on: Option<NaiveDate>,
    pub batches: i32,
    pub weight_per_batch: f64,
}

/// 批次修改（未提供的字段保持不变）
///
/// 生产日期字段: None = 不修改，Some(None) = 清空
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPatch {
    pub compound_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub cover_compound_produced_on: Option<Option<NaiveDate>>,
    pub skim_compound_produced_on: Option<Option<NaiveDate>>,
    pub batches: Option<i32>,
    pub weight_per_batch: Option<f64>,
}

/// 批次修改结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateOutcome {
    pub batch: CompoundBatch,
    /// 数量变更时的对账结果
    pub reconciliation: Option<ReconciliationReport>,
}

/// 输送带消耗登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBeltInput {
    pub belt_number: String,
    pub calendaring_date: NaiveDate,
    #[serde(default)]
    pub cover_compound_code: Option<String>,
    #[serde(default)]
    pub cover_weight_kg: f64,
    #[serde(default)]
    pub skim_compound_code: Option<String>,
    #[serde(default)]
    pub skim_weight_kg: f64,
    /// 指定优先消耗的覆盖胶生产日期
    #[serde(default)]
    pub cover_production_date_hint: Option<NaiveDate>,
    #[serde(default)]
    pub skim_production_date_hint: Option<NaiveDate>,
}

impl NewBeltInput {
    fn compound_code(&self, category: CompoundCategory) -> Option<&str> {
        match category {
            CompoundCategory::Cover => self.cover_compound_code.as_deref(),
            CompoundCategory::Skim => self.skim_compound_code.as_deref(),
        }
    }

    fn weight_kg(&self, category: CompoundCategory) -> f64 {
        match category {
            CompoundCategory::Cover => self.cover_weight_kg,
            CompoundCategory::Skim => self.skim_weight_kg,
        }
    }

    fn production_date_hint(&self, category: CompoundCategory) -> Option<NaiveDate> {
        match category {
            CompoundCategory::Cover => self.cover_production_date_hint,
            CompoundCategory::Skim => self.skim_production_date_hint,
        }
    }
}

// ==========================================
// InventoryApi - 库存 API
// ==========================================
pub struct InventoryApi {
    conn: Arc<Mutex<Connection>>,
    config: EngineConfig,
    allocation: Arc<AllocationEngine>,
    reconciliation: ReconciliationEngine,
}

impl InventoryApi {
    /// 创建 InventoryApi，引擎配置从 config_kv 读取
    pub fn new(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        let config = ConfigManager::from_connection(conn.clone())?.load_engine_config()?;
        Ok(Self::with_config(conn, config))
    }

    /// 使用指定引擎配置创建（测试可注入固定种子）
    pub fn with_config(conn: Arc<Mutex<Connection>>, config: EngineConfig) -> Self {
        let resolver = Arc::new(MaterialResolver::new(&config));
        let allocation = Arc::new(AllocationEngine::new(resolver));
        let reconciliation = ReconciliationEngine::new(allocation.clone(), config.reconcile_mode);

        info!(
            lookback_start_months = config.lookback_start_months,
            lookback_max_months = config.lookback_max_months,
            reconcile_mode = %config.reconcile_mode,
            "InventoryApi 初始化完成"
        );

        Self {
            conn,
            config,
            allocation,
            reconciliation,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn get_conn(&self) -> ApiResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", e)))
    }

    /// 在写事务中执行，成功提交，失败回滚（Transaction drop）
    fn with_write_tx<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Connection) -> ApiResult<T>,
    {
        let mut conn = self.get_conn()?;
        let tx = begin_write(&mut conn)?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ==========================================
    // 批次
    // ==========================================

    /// 登记批次
    ///
    /// # 返回
    /// - Ok(CompoundBatch): 新批次（剩余 = 总量，已消耗 = 0）
    /// - Err(NotFound): 配方主数据不存在
    /// - Err(Conflict): 投产日期或胶料生产日期已被占用
    #[instrument(skip(self, input), fields(compound_code = %input.compound_code, date = %input.date))]
    pub fn register_batch(&self, input: NewBatchInput) -> ApiResult<CompoundBatch> {
        let compound_code = input.compound_code.trim().to_string();
        if compound_code.is_empty() {
            return Err(ApiError::InvalidInput("胶料编码不能为空".to_string()));
        }
        let totals = BatchTotals {
            batches: input.batches,
            weight_per_batch: input.weight_per_batch,
        };
        totals.validate()?;

        self.with_write_tx(|conn| {
            let master = CompoundMasterRepository::new(conn).get(&compound_code)?;
            let batch_repo = CompoundBatchRepository::new(conn);

            if let Some(existing) = batch_repo.find_by_date(input.date)? {
                return Err(ApiError::Conflict(format!(
                    "投产日期 {} 已被批次 {} 使用",
                    input.date, existing.batch_id
                )));
            }
            DateUniquenessGuard::check(
                conn,
                None,
                input.cover_compound_produced_on,
                input.skim_compound_produced_on,
            )?;

            let total = totals.total_inventory();
            let now = Utc::now();
            let mut batch = CompoundBatch {
                batch_id: Uuid::new_v4().to_string(),
                compound_code: master.compound_code.clone(),
                compound_name: master.compound_name.clone(),
                date: input.date,
                cover_compound_produced_on: input.cover_compound_produced_on,
                skim_compound_produced_on: input.skim_compound_produced_on,
                batches: totals.batches,
                weight_per_batch: totals.weight_per_batch,
                total_inventory: total,
                inventory_remaining: total,
                consumed: 0.0,
                materials_used: Vec::new(),
                created_seq: batch_repo.next_created_seq()?,
                created_at: now,
                updated_at: now,
            };
            ensure_category_matches(&master, &batch)?;

            batch.materials_used = self.resolve_batch_materials(conn, &master, &batch)?;
            batch_repo.insert(&batch)?;

            info!(
                batch_id = %batch.batch_id,
                total_inventory = batch.total_inventory,
                unresolved = batch.has_unresolved_materials(),
                "批次登记完成"
            );
            Ok(batch)
        })
    }

    /// 修改批次
    ///
    /// # 说明
    /// - 生产日期变更: 日期唯一性校验
    /// - 批号目标日期（生产日期，缺省为投产日期）变更: 重新解析原材料批号
    /// - 批数/单批重量变更: 触发对账
    /// - 已有消耗的批次不能变更胶料类别
    #[instrument(skip(self, patch))]
    pub fn update_batch(&self, batch_id: &str, patch: BatchPatch) -> ApiResult<BatchUpdateOutcome> {
        if batch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次ID不能为空".to_string()));
        }

        self.with_write_tx(|conn| {
            let batch_repo = CompoundBatchRepository::new(conn);
            let current = batch_repo.get(batch_id)?;
            let mut updated = current.clone();

            if let Some(name) = &patch.compound_name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ApiError::ValidationError("胶料名称不能为空".to_string()));
                }
                updated.compound_name = name.to_string();
            }
            if let Some(date) = patch.date {
                if date != current.date {
                    if let Some(other) = batch_repo.find_by_date(date)? {
                        return Err(ApiError::Conflict(format!(
                            "投产日期 {} 已被批次 {} 使用",
                            date, other.batch_id
                        )));
                    }
                }
                updated.date = date;
            }
            if let Some(cover_on) = patch.cover_compound_produced_on {
                updated.cover_compound_produced_on = cover_on;
            }
            if let Some(skim_on) = patch.skim_compound_produced_on {
                updated.skim_compound_produced_on = skim_on;
            }

            DateUniquenessGuard::check(
                conn,
                Some(batch_id),
                updated.cover_compound_produced_on,
                updated.skim_compound_produced_on,
            )?;

            let master = CompoundMasterRepository::new(conn).find_by_code(&current.compound_code)?;
            if updated.category() != current.category() {
                if current.consumed > 0.0 {
                    return Err(ApiError::ValidationError(format!(
                        "批次 {} 已消耗 {:.2} kg，不能变更胶料类别",
                        batch_id, current.consumed
                    )));
                }
                if let Some(master) = &master {
                    ensure_category_matches(master, &updated)?;
                }
            }

            batch_repo.update_attributes(&updated)?;

            if updated.material_target_date() != current.material_target_date() {
                match &master {
                    Some(master) => {
                        let materials = self.resolve_batch_materials(conn, master, &updated)?;
                        batch_repo.update_materials(batch_id, &materials)?;
                    }
                    None => warn!(
                        compound_code = %current.compound_code,
                        "配方主数据缺失，目标日期变更后未重新解析物料批号"
                    ),
                }
            }

            let totals = BatchTotals {
                batches: patch.batches.unwrap_or(current.batches),
                weight_per_batch: patch.weight_per_batch.unwrap_or(current.weight_per_batch),
            };
            let quantities_changed = totals.batches != current.batches
                || round2(totals.weight_per_batch) != round2(current.weight_per_batch);

            let reconciliation = if quantities_changed {
                let (_, report) = self
                    .reconciliation
                    .reconcile_batch_change(conn, batch_id, totals)?;
                Some(report)
            } else {
                None
            };

            let batch = batch_repo.get(batch_id)?;
            info!(
                batch_id,
                total_inventory = batch.total_inventory,
                reconciled = reconciliation.is_some(),
                "批次修改完成"
            );
            Ok(BatchUpdateOutcome {
                batch,
                reconciliation,
            })
        })
    }

    /// 删除批次（有消耗时先迁移到其它批次）
    #[instrument(skip(self))]
    pub fn delete_batch(&self, batch_id: &str) -> ApiResult<ReconciliationReport> {
        if batch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次ID不能为空".to_string()));
        }
        self.with_write_tx(|conn| Ok(self.reconciliation.reconcile_batch_deletion(conn, batch_id)?))
    }

    // ==========================================
    // 输送带
    // ==========================================

    /// 登记输送带并分配覆盖胶/贴胶消耗
    ///
    /// # 返回
    /// - Ok(Belt): 含消耗边的输送带
    /// - Err(InsufficientInventory): 任一类别库存不足，整体回滚
    #[instrument(skip(self, input), fields(belt_number = %input.belt_number))]
    pub fn record_belt_consumption(&self, input: NewBeltInput) -> ApiResult<Belt> {
        let belt_number = input.belt_number.trim().to_string();
        if belt_number.is_empty() {
            return Err(ApiError::InvalidInput("输送带编号不能为空".to_string()));
        }
        for category in CompoundCategory::ALL {
            let weight = input.weight_kg(category);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ApiError::ValidationError(format!(
                    "{} 重量非法: {}",
                    category, weight
                )));
            }
            match input.compound_code(category) {
                Some(code) if code.trim().is_empty() => {
                    return Err(ApiError::ValidationError(format!("{} 胶料编码不能为空", category)));
                }
                None if weight > 0.0 => {
                    return Err(ApiError::ValidationError(format!(
                        "{} 重量 {} kg 未指定胶料编码",
                        category, weight
                    )));
                }
                _ => {}
            }
        }

        self.with_write_tx(|conn| {
            let belt_repo = BeltRepository::new(conn);
            let now = Utc::now();
            let belt = Belt {
                belt_id: Uuid::new_v4().to_string(),
                belt_number: belt_number.clone(),
                calendaring_date: input.calendaring_date,
                cover_compound_code: input.cover_compound_code.as_deref().map(|c| c.trim().to_string()),
                cover_weight_kg: round2(input.cover_weight_kg),
                skim_compound_code: input.skim_compound_code.as_deref().map(|c| c.trim().to_string()),
                skim_weight_kg: round2(input.skim_weight_kg),
                cover_usages: Vec::new(),
                skim_usages: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            belt_repo.insert(&belt)?;

            for category in CompoundCategory::ALL {
                let (Some(code), required_kg) = (belt.compound_code(category), belt.required_kg(category))
                else {
                    continue;
                };
                if required_kg <= 0.0 {
                    continue;
                }
                let allocation = self.allocation.consume(
                    conn,
                    &ConsumeRequest {
                        compound_code: code.to_string(),
                        required_kg,
                        preferred_date: belt.calendaring_date,
                        production_date_hint: input.production_date_hint(category),
                        category,
                        belt_id: Some(belt.belt_id.clone()),
                    },
                )?;
                for usage in &allocation.batches_used {
                    belt_repo.merge_usage(&belt.belt_id, category, usage)?;
                }
            }

            let belt = belt_repo.get(&belt.belt_id)?;
            info!(
                belt_id = %belt.belt_id,
                cover_kg = belt.allocated_kg(CompoundCategory::Cover),
                skim_kg = belt.allocated_kg(CompoundCategory::Skim),
                "输送带消耗登记完成"
            );
            Ok(belt)
        })
    }

    /// 释放输送带: 回退全部消耗并删除输送带
    #[instrument(skip(self))]
    pub fn release_belt(&self, belt_id: &str) -> ApiResult<Belt> {
        self.with_write_tx(|conn| {
            let belt_repo = BeltRepository::new(conn);
            let belt = belt_repo.get(belt_id)?;
            for category in CompoundCategory::ALL {
                self.allocation.revert(
                    conn,
                    Some(&belt.belt_id),
                    belt.usages(category),
                    belt.calendaring_date,
                )?;
            }
            belt_repo.delete(belt_id)?;
            info!(belt_id, "输送带消耗已回退并删除");
            Ok(belt)
        })
    }

    /// 更正压延日期，并尽力回填相关台账日期
    ///
    /// # 返回
    /// - Ok(n): 回填的台账行数（回填失败为 0，不影响日期更正）
    #[instrument(skip(self))]
    pub fn correct_belt_date(&self, belt_id: &str, calendaring_date: NaiveDate) -> ApiResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = begin_write(&mut conn)?;
        BeltRepository::new(&tx).update_calendaring_date(belt_id, calendaring_date)?;
        tx.commit()?;

        Ok(HistoryLedger::backfill_dates(&conn, belt_id, calendaring_date))
    }

    pub fn get_belt(&self, belt_id: &str) -> ApiResult<Belt> {
        let conn = self.get_conn()?;
        Ok(BeltRepository::new(&conn).get(belt_id)?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_batch(&self, batch_id: &str) -> ApiResult<CompoundBatch> {
        let conn = self.get_conn()?;
        Ok(CompoundBatchRepository::new(&conn).get(batch_id)?)
    }

    /// 批次列表（按创建顺序）
    pub fn list_batches(&self, compound_code: Option<&str>) -> ApiResult<Vec<CompoundBatch>> {
        let conn = self.get_conn()?;
        Ok(CompoundBatchRepository::new(&conn).list(compound_code)?)
    }

    /// 批次台账（按写入顺序）
    pub fn list_history(&self, batch_id: &str) -> ApiResult<Vec<CompoundHistory>> {
        let conn = self.get_conn()?;
        CompoundBatchRepository::new(&conn).get(batch_id)?;
        Ok(CompoundHistoryRepository::new(&conn).list_by_batch(batch_id)?)
    }

    /// 存在未解析原材料批号的批次（人工跟进清单）
    pub fn list_unresolved_material_batches(&self) -> ApiResult<Vec<CompoundBatch>> {
        let conn = self.get_conn()?;
        let batches = CompoundBatchRepository::new(&conn).list(None)?;
        Ok(batches
            .into_iter()
            .filter(|b| b.has_unresolved_materials())
            .collect())
    }

    /// 库存守恒审计（只读）
    pub fn audit_inventory(&self) -> ApiResult<InventoryAuditReport> {
        let conn = self.get_conn()?;
        Ok(InventoryAuditor::audit(&conn)?)
    }

    /// 解析单个原材料批号（空串 = 未找到）
    pub fn resolve_material_code(&self, material_name: &str, target_date: NaiveDate) -> ApiResult<String> {
        let conn = self.get_conn()?;
        Ok(self
            .allocation
            .resolver()
            .resolve(&conn, material_name, target_date)?)
    }

    /// 按配方原材料列表解析批号，目标日期取胶料生产日期（缺省为投产日期）
    fn resolve_batch_materials(
        &self,
        conn: &Connection,
        master: &CompoundMaster,
        batch: &CompoundBatch,
    ) -> ApiResult<Vec<MaterialUsed>> {
        if master.raw_materials.is_empty() {
            warn!(compound_code = %master.compound_code, "配方未配置原材料，物料批号为空");
            return Ok(Vec::new());
        }
        let target_date = batch.material_target_date();
        Ok(self
            .allocation
            .resolver()
            .resolve_materials(conn, &master.raw_materials, target_date)?)
    }
}

/// 批次填写的生产日期类别必须与配方类别一致
fn ensure_category_matches(master: &CompoundMaster, batch: &CompoundBatch) -> ApiResult<()> {
    match batch.category() {
        Some(category) if category != master.category => Err(ApiError::ValidationError(format!(
            "胶料 {} 属于 {}，不能填写 {} 生产日期",
            master.compound_code, master.category, category
        ))),
        _ => Ok(()),
    }
}
