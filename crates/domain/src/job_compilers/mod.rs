//! 作业分解器
//!
//! 每种作业类型对应一个分解函数，把作业及其设置转换为一组任务草稿。
//! 分解完全在内存中进行；调用方在一个事务中持久化全部草稿，
//! 因此任何设置错误都不会留下孤立任务。

mod render;
mod single;
mod tiled;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use renderfarm_core::{FarmError, FarmResult, Job, TaskDraft};

use crate::settings::{JobSettings, Platform};

pub use render::{compile_simple_render, compile_turbo_render};
pub use single::{compile_bake_anim_cache, compile_exec_command, compile_opengl_render};
pub use tiled::{compile_tiled_render, DEFAULT_TILES};

/// 作业类型标签
pub mod job_types {
    pub const BLENDER_SIMPLE_RENDER: &str = "blender_simple_render";
    pub const BLENDER_SIMPLE_RENDER_TURBO: &str = "blender_simple_render_turbo";
    pub const TILED_BLENDER_RENDER: &str = "tiled_blender_render";
    pub const BLENDER_BAKE_ANIM_CACHE: &str = "blender_bake_anim_cache";
    pub const BLENDER_OPENGL_RENDER: &str = "blender_opengl_render";
    pub const EXEC_COMMAND: &str = "exec_command";
}

/// 输出路径缺省时使用的帧号占位模式
pub const DEFAULT_OUTPUT_PATTERN: &str = "#####";

/// 作业分解函数
pub type JobCompileFn = fn(&Job) -> FarmResult<Vec<TaskDraft>>;

/// 作业类型到分解函数的注册表
#[derive(Clone, Default)]
pub struct JobCompilerRegistry {
    compilers: BTreeMap<String, JobCompileFn>,
}

impl JobCompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置作业类型
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(job_types::BLENDER_SIMPLE_RENDER, compile_simple_render)
            .register(job_types::BLENDER_SIMPLE_RENDER_TURBO, compile_turbo_render)
            .register(job_types::TILED_BLENDER_RENDER, compile_tiled_render)
            .register(job_types::BLENDER_BAKE_ANIM_CACHE, compile_bake_anim_cache)
            .register(job_types::BLENDER_OPENGL_RENDER, compile_opengl_render)
            .register(job_types::EXEC_COMMAND, compile_exec_command);
        registry
    }

    pub fn register(&mut self, job_type: impl Into<String>, compiler: JobCompileFn) -> &mut Self {
        self.compilers.insert(job_type.into(), compiler);
        self
    }

    pub fn supports(&self, job_type: &str) -> bool {
        self.compilers.contains_key(job_type)
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.compilers.keys().map(String::as_str)
    }

    /// 分解作业
    ///
    /// 返回的草稿至少包含一项，且所有 `blocks` 下标都指向同一批中的其他草稿。
    pub fn compile(&self, job: &Job) -> FarmResult<Vec<TaskDraft>> {
        let compiler = self
            .compilers
            .get(&job.job_type)
            .ok_or_else(|| FarmError::UnknownJobType(job.job_type.clone()))?;

        let drafts = compiler(job)?;
        if drafts.is_empty() {
            return Err(FarmError::invalid_setting("frames", "作业没有生成任何任务"));
        }

        for (index, draft) in drafts.iter().enumerate() {
            if let Some(target) = draft.blocks {
                if target >= drafts.len() || target == index {
                    return Err(FarmError::Internal(format!(
                        "任务草稿 {index} 的依赖指针无效: {target}"
                    )));
                }
            }
        }

        debug!(
            "作业 '{}' ({}) 分解为 {} 个任务",
            job.name,
            job.job_type,
            drafts.len()
        );
        Ok(drafts)
    }
}

/// 所有渲染类任务共享的设置：源文件、可选透传项以及各平台路径
pub(crate) fn base_settings(settings: &JobSettings<'_>) -> FarmResult<Map<String, Value>> {
    let filepath = settings.required_str("filepath")?;

    let mut base = Map::new();
    base.insert("filepath".to_string(), Value::from(filepath));
    for key in ["format", "render_settings", "command_name"] {
        if let Some(value) = settings.get(key) {
            base.insert(key.to_string(), value.clone());
        }
    }

    // Worker 的平台在分解时未知，预先为每个平台展开一份路径
    let default_output = settings
        .optional_str("output_path")?
        .unwrap_or(DEFAULT_OUTPUT_PATTERN);
    for platform in Platform::ALL {
        let file_key = platform.file_path_key();
        let file_path = non_empty(settings.optional_str(&file_key)?).unwrap_or(filepath);
        base.insert(file_key, Value::from(file_path));

        let output_key = platform.output_path_key();
        let output_path = non_empty(settings.optional_str(&output_key)?).unwrap_or(default_output);
        base.insert(output_key, Value::from(output_path));
    }

    Ok(base)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// 任务优先级：默认继承作业优先级，可由 `task_priority` 覆盖
pub(crate) fn task_priority(job: &Job, settings: &JobSettings<'_>) -> FarmResult<i32> {
    match settings.optional_i64("task_priority")? {
        None => Ok(job.priority),
        Some(p) => i32::try_from(p)
            .map_err(|_| FarmError::invalid_setting("task_priority", "超出范围")),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::job;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_job_type_rejected() {
        let registry = JobCompilerRegistry::with_defaults();
        let err = registry.compile(&job("fluid_sim", json!({}))).unwrap_err();
        assert!(matches!(err, FarmError::UnknownJobType(ref t) if t == "fluid_sim"));
        assert!(err.is_settings_error());
    }

    #[test]
    fn test_registry_lists_builtin_types() {
        let registry = JobCompilerRegistry::with_defaults();
        assert!(registry.supports(job_types::TILED_BLENDER_RENDER));
        assert_eq!(registry.job_types().count(), 6);
    }

    #[test]
    fn test_custom_variant_registration() {
        fn one_task(job: &Job) -> FarmResult<Vec<TaskDraft>> {
            Ok(vec![TaskDraft {
                name: job.name.clone(),
                task_type: "noop".to_string(),
                settings: json!({}),
                priority: job.priority,
                blocks: None,
            }])
        }

        let mut registry = JobCompilerRegistry::new();
        registry.register("noop", one_task);
        let drafts = registry.compile(&job("noop", json!({}))).unwrap();
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn test_invalid_dependency_pointer_rejected() {
        fn self_blocking(_: &Job) -> FarmResult<Vec<TaskDraft>> {
            Ok(vec![TaskDraft {
                name: "loop".to_string(),
                task_type: "noop".to_string(),
                settings: json!({}),
                priority: 0,
                blocks: Some(0),
            }])
        }

        let mut registry = JobCompilerRegistry::new();
        registry.register("loop", self_blocking);
        assert!(registry.compile(&job("loop", json!({}))).is_err());
    }

    #[test]
    fn test_base_settings_resolve_platform_paths() {
        let value = json!({
            "filepath": "shots/010.blend",
            "format": "PNG",
            "file_path_win": "S:\\shots\\010.blend",
            "output_path": "renders/010",
            "output_path_osx": ""
        });
        let settings = JobSettings::new(&value).unwrap();
        let base = base_settings(&settings).unwrap();

        assert_eq!(base["file_path_linux"], "shots/010.blend");
        assert_eq!(base["file_path_win"], "S:\\shots\\010.blend");
        assert_eq!(base["file_path_osx"], "shots/010.blend");
        assert_eq!(base["output_path_linux"], "renders/010");
        assert_eq!(base["output_path_osx"], "renders/010");
        assert_eq!(base["format"], "PNG");
        assert!(!base.contains_key("render_settings"));
    }
}
