use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use renderfarm_core::{FarmError, FarmResult};
use renderfarm_domain::ThumbnailGenerator;

/// 调用 ImageMagick `convert` 生成缩略图
pub struct ImageMagickThumbnailer {
    program: String,
    storage_dir: PathBuf,
    size: u32,
}

impl ImageMagickThumbnailer {
    pub fn new(storage_dir: impl Into<PathBuf>, size: u32) -> Self {
        Self {
            program: "convert".to_string(),
            storage_dir: storage_dir.into(),
            size,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn thumbnail_path(&self, task_id: i64) -> PathBuf {
        self.storage_dir.join(format!("thumbnail_{task_id}.png"))
    }

    fn arguments(&self, source: &Path, target: &Path) -> Vec<String> {
        vec![
            source.display().to_string(),
            "-resize".to_string(),
            format!("{0}x{0}", self.size),
            target.display().to_string(),
        ]
    }
}

impl ThumbnailGenerator for ImageMagickThumbnailer {
    fn generate(&self, source: &Path, task_id: i64) -> FarmResult<PathBuf> {
        let target = self.thumbnail_path(task_id);
        let status = Command::new(&self.program)
            .args(self.arguments(source, &target))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| FarmError::TaskExecution(format!("启动 {} 失败: {e}", self.program)))?;

        if !status.success() {
            return Err(FarmError::TaskExecution(format!(
                "生成缩略图失败，{} 退出码: {:?}",
                self.program,
                status.code()
            )));
        }

        debug!("已生成缩略图 {}", target.display());
        Ok(target)
    }
}
