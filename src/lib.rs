// ==========================================
// 输送带胶料库存系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 胶料批次库存的消耗分配、对账与原材料追溯
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 共享状态
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{CompoundCategory, HistoryEventType, ReconcileMode};

// 领域实体
pub use domain::{
    BatchUsage, Belt, CompoundBatch, CompoundHistory, CompoundMaster, MaterialUsed,
    RawMaterialLot,
};

// 引擎
pub use engine::{
    AllocationEngine, DateUniquenessGuard, HistoryLedger, InventoryAuditor, MaterialResolver,
    ReconciliationEngine,
};

// API
pub use api::{ApiError, ApiResult, InventoryApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "输送带胶料库存系统";
