use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use renderfarm_core::{FarmError, FarmResult};
use renderfarm_domain::AuxiliaryFileSink;

/// 本地作业存储
///
/// 每个作业一个目录 `storage_dir/<job_id>/`，放置编译器生成的辅助脚本。
#[derive(Debug, Clone)]
pub struct JobStorage {
    root: PathBuf,
}

impl JobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: i64) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    pub fn ensure_job_dir(&self, job_id: i64) -> FarmResult<PathBuf> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).map_err(|e| {
            FarmError::TaskExecution(format!("创建作业目录 {} 失败: {e}", dir.display()))
        })?;
        Ok(dir)
    }
}

impl AuxiliaryFileSink for JobStorage {
    fn add_file(&mut self, contents: &str, filename: &str, job_id: i64) -> FarmResult<()> {
        let path = self.ensure_job_dir(job_id)?.join(filename);
        fs::write(&path, contents).map_err(|e| {
            FarmError::TaskExecution(format!("写入辅助文件 {} 失败: {e}", path.display()))
        })?;
        debug!("已写入辅助文件 {}", path.display());
        Ok(())
    }
}
