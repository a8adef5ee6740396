//! 任务命令编译
//!
//! 把一个任务编译为 Manager 可直接执行的命令行。编译结果中的路径使用
//! 占位符表示，由 Manager 在执行前替换为本地目录：
//!
//! - `==jobpath==`: 作业存储目录
//! - `==outputpath==`: 作业输出目录
//! - `==command==`: 渲染程序

mod blender;
mod exec;
pub mod scripts;

use std::collections::BTreeMap;

use renderfarm_core::{FarmError, FarmResult, Task};

use crate::settings::Platform;

pub use blender::{
    compile_bake_anim_cache, compile_opengl_render, compile_simple_render,
    compile_tiled_mix, compile_tiled_tile, compile_turbo_render, frame_arguments,
};
pub use exec::compile_exec_command;

pub const JOB_PATH: &str = "==jobpath==";
pub const OUTPUT_PATH: &str = "==outputpath==";
pub const COMMAND: &str = "==command==";

/// 任务类型标签
pub mod task_types {
    pub const BLENDER_SIMPLE_RENDER: &str = "blender_simple_render";
    pub const BLENDER_SIMPLE_RENDER_TURBO: &str = "blender_simple_render_turbo";
    pub const TILED_BLENDER_RENDER: &str = "tiled_blender_render";
    pub const TILED_BLENDER_RENDER_SIMPLE_MIX: &str = "tiled_blender_render_simple_mix";
    pub const BLENDER_BAKE_ANIM_CACHE: &str = "blender_bake_anim_cache";
    pub const BLENDER_OPENGL_RENDER: &str = "blender_opengl_render";
    pub const EXEC_COMMAND: &str = "exec_command";
}

/// 编译器写出辅助脚本的目标
///
/// Manager 的实现把文件落到 `storage_dir/<job_id>/<filename>`。
pub trait AuxiliaryFileSink {
    fn add_file(&mut self, contents: &str, filename: &str, job_id: i64) -> FarmResult<()>;
}

/// 编译后的命令
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledCommand {
    pub argv: Vec<String>,
    /// 额外的环境变量
    pub env: Vec<(String, String)>,
    /// 需要图形界面的命令不能以后台方式运行
    pub foreground: bool,
}

impl CompiledCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            foreground: false,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn in_foreground(mut self) -> Self {
        self.foreground = true;
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// 占位符在 Manager 本地的取值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderValues {
    pub job_path: String,
    pub output_path: String,
    pub command: String,
}

/// 替换 argv 与环境变量中的全部占位符
pub fn resolve_placeholders(
    command: &CompiledCommand,
    values: &PlaceholderValues,
) -> CompiledCommand {
    let substitute = |s: &str| {
        s.replace(JOB_PATH, &values.job_path)
            .replace(OUTPUT_PATH, &values.output_path)
            .replace(COMMAND, &values.command)
    };

    CompiledCommand {
        argv: command.argv.iter().map(|a| substitute(a)).collect(),
        env: command
            .env
            .iter()
            .map(|(k, v)| (k.clone(), substitute(v)))
            .collect(),
        foreground: command.foreground,
    }
}

/// 任务编译函数
pub type TaskCompileFn =
    fn(&Task, Platform, &mut dyn AuxiliaryFileSink) -> FarmResult<CompiledCommand>;

/// 任务类型到编译函数的注册表
#[derive(Clone, Default)]
pub struct TaskCompilerRegistry {
    compilers: BTreeMap<String, TaskCompileFn>,
}

impl TaskCompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(task_types::BLENDER_SIMPLE_RENDER, compile_simple_render)
            .register(task_types::BLENDER_SIMPLE_RENDER_TURBO, compile_turbo_render)
            .register(task_types::TILED_BLENDER_RENDER, compile_tiled_tile)
            .register(task_types::TILED_BLENDER_RENDER_SIMPLE_MIX, compile_tiled_mix)
            .register(task_types::BLENDER_BAKE_ANIM_CACHE, compile_bake_anim_cache)
            .register(task_types::BLENDER_OPENGL_RENDER, compile_opengl_render)
            .register(task_types::EXEC_COMMAND, compile_exec_command);
        registry
    }

    pub fn register(&mut self, task_type: impl Into<String>, compiler: TaskCompileFn) -> &mut Self {
        self.compilers.insert(task_type.into(), compiler);
        self
    }

    pub fn supports(&self, task_type: &str) -> bool {
        self.compilers.contains_key(task_type)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.compilers.keys().map(String::as_str)
    }

    pub fn compile(
        &self,
        task: &Task,
        platform: Platform,
        sink: &mut dyn AuxiliaryFileSink,
    ) -> FarmResult<CompiledCommand> {
        let compiler = self
            .compilers
            .get(&task.task_type)
            .ok_or_else(|| FarmError::UnknownTaskType(task.task_type.clone()))?;
        compiler(task, platform, sink)
    }
}

/// 在占位目录下拼接相对路径，绝对路径保持原样
pub(crate) fn join_path(base: &str, path: &str) -> String {
    if is_absolute(path) {
        return path.to_string();
    }
    let path = path.trim_start_matches("./");
    if path.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{path}")
    }
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}
