// ==========================================
// 输送带胶料库存系统 - 原材料批号解析器
// ==========================================
// 规则:
// 1) 从 [目标日期 - N 月, 目标日期] 的同名到货批中随机挑选一个
// 2) 无命中则 N += 1，直至上限
// 3) 仍无命中则不限日期查询同名到货批，随机挑选
// 4) 完全不存在同名到货批时返回空串（非错误，批次标记待人工跟进）
// 说明: 同一窗口内的到货批视为可互换库存，不做 FIFO
// ==========================================

use crate::config::EngineConfig;
use crate::domain::batch::{MaterialUsed, RawMaterialLot};
use crate::engine::error::EngineResult;
use crate::repository::error::RepositoryError;
use crate::repository::RawMaterialLotRepository;
use chrono::{Months, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::Connection;
use std::sync::Mutex;
use tracing::{debug, warn};

// ==========================================
// MaterialResolver - 原材料批号解析器
// ==========================================
pub struct MaterialResolver {
    lookback_start_months: u32,
    lookback_max_months: u32,
    rng: Mutex<StdRng>,
}

impl MaterialResolver {
    /// 按配置创建（配置了种子则可复现）
    pub fn new(config: &EngineConfig) -> Self {
        let rng = match config.lot_selection_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// 注入随机源
    pub fn with_rng(config: &EngineConfig, rng: StdRng) -> Self {
        let lookback_start_months = config.lookback_start_months.max(1);
        Self {
            lookback_start_months,
            lookback_max_months: config.lookback_max_months.max(lookback_start_months),
            rng: Mutex::new(rng),
        }
    }

    /// 解析单个原材料的批号
    ///
    /// # 返回
    /// - Ok(code): 命中的到货批号
    /// - Ok(""): 不存在同名到货批
    pub fn resolve(
        &self,
        conn: &Connection,
        material_name: &str,
        target_date: NaiveDate,
    ) -> EngineResult<String> {
        let name = material_name.trim();
        if name.is_empty() {
            return Ok(String::new());
        }

        let repo = RawMaterialLotRepository::new(conn);

        for months in self.lookback_start_months..=self.lookback_max_months {
            let from = target_date
                .checked_sub_months(Months::new(months))
                .unwrap_or(NaiveDate::MIN);
            let lots = repo.find_by_name_between(name, from, target_date)?;
            if let Some(code) = self.pick(&lots)? {
                debug!(material = name, %target_date, months, code = %code, "物料批号命中回溯窗口");
                return Ok(code);
            }
        }

        let lots = repo.find_by_name(name)?;
        if let Some(code) = self.pick(&lots)? {
            debug!(material = name, %target_date, code = %code, "物料批号窗口外命中");
            return Ok(code);
        }

        warn!(material = name, %target_date, "未找到同名原材料到货批，批号留空待人工跟进");
        Ok(String::new())
    }

    /// 按配方原材料顺序解析全部批号
    pub fn resolve_materials(
        &self,
        conn: &Connection,
        raw_materials: &[String],
        target_date: NaiveDate,
    ) -> EngineResult<Vec<MaterialUsed>> {
        raw_materials
            .iter()
            .map(|name| {
                Ok(MaterialUsed {
                    material_name: name.clone(),
                    material_code: self.resolve(conn, name, target_date)?,
                })
            })
            .collect()
    }

    /// 只补齐空批号，已解析的保持不变；返回是否有变化
    pub fn fill_unresolved(
        &self,
        conn: &Connection,
        materials: &mut [MaterialUsed],
        target_date: NaiveDate,
    ) -> EngineResult<bool> {
        let mut changed = false;
        for material in materials.iter_mut().filter(|m| !m.is_resolved()) {
            let code = self.resolve(conn, &material.material_name, target_date)?;
            if !code.is_empty() {
                material.material_code = code;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn pick(&self, lots: &[RawMaterialLot]) -> EngineResult<Option<String>> {
        if lots.is_empty() {
            return Ok(None);
        }
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(lots.choose(&mut *rng).map(|lot| lot.material_code.clone()))
    }
}
