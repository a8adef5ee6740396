//! 配置管理
//!
//! 配置按以下顺序合并：
//!
//! 1. 各配置段的默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `RENDERFARM_`，层级分隔符 `__`）
//!
//! 每个配置段都提供 `validate()`，加载后统一校验。

pub mod models;

pub use models::{
    ApiConfig, AppConfig, DatabaseConfig, DispatcherConfig, ManagerConfig, ObservabilityConfig,
};

#[cfg(test)]
mod tests;
