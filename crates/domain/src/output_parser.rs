//! 渲染进程输出解析
//!
//! 逐行读取渲染程序的标准输出，把最近一次匹配到的帧号、剩余时间、
//! 阶段和保存路径写入 `TaskActivity`。

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use renderfarm_core::{FarmResult, TaskActivity};

/// 为保存的图像生成缩略图
pub trait ThumbnailGenerator: Send + Sync {
    /// 返回生成的缩略图路径
    fn generate(&self, source: &Path, task_id: i64) -> FarmResult<PathBuf>;
}

/// 单行解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// 进度快照是否发生变化
    pub updated: bool,
    /// 缺失资源之类需要写入任务日志的警告
    pub warning: Option<String>,
    /// 本行报告保存的图像路径
    pub saved: Option<PathBuf>,
}

static FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Fra:(\d+)").expect("valid regex"));
static REMAINING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Remaining:(?:(\d+):)?(\d+):(\d+)\.(\d+)").expect("valid regex")
});
static STAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.* \| (.*)$").expect("valid regex"));
static SAVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Saved: '(.*?)'").expect("valid regex"));
static PATH_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Warning: Path '.*' not found").expect("valid regex"));

const FINISHED_STAGE: &str = "Finished";
const UNABLE_TO_OPEN: &str = "Warning: Unable to open";

pub struct RenderOutputParser<'a> {
    task_id: i64,
    thumbnails: &'a dyn ThumbnailGenerator,
    activity: TaskActivity,
}

impl<'a> RenderOutputParser<'a> {
    pub fn new(task_id: i64, thumbnails: &'a dyn ThumbnailGenerator) -> Self {
        Self {
            task_id,
            thumbnails,
            activity: TaskActivity::default(),
        }
    }

    pub fn activity(&self) -> &TaskActivity {
        &self.activity
    }

    pub fn into_activity(self) -> TaskActivity {
        self.activity
    }

    /// 解析一行输出，遇到保存记录时同步生成缩略图
    ///
    /// 没有任何匹配时返回 `updated = false`，不视为错误。
    pub fn feed_line(&mut self, line: &str) -> ParseOutcome {
        let outcome = self.parse_line(line);
        if let Some(saved) = &outcome.saved {
            let result = self.thumbnails.generate(saved, self.task_id);
            self.record_thumbnail(result);
        }
        outcome
    }

    /// 只解析，不生成缩略图
    ///
    /// 调用方负责为 `ParseOutcome::saved` 生成缩略图，并通过
    /// [`record_thumbnail`](Self::record_thumbnail) 写回结果。
    pub fn parse_line(&mut self, line: &str) -> ParseOutcome {
        let line = line.trim_end_matches(['\r', '\n']);
        let before = self.activity.clone();

        if let Some(frame) = FRAME
            .captures(line)
            .and_then(|c| c[1].parse::<i64>().ok())
        {
            self.activity.current_frame = Some(frame);
        }

        if let Some(caps) = REMAINING.captures(line) {
            let number = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<u64>().ok())
                    .unwrap_or(0)
            };
            self.activity.remaining_seconds = Some(
                number(1)
                    .saturating_mul(3600)
                    .saturating_add(number(2).saturating_mul(60))
                    .saturating_add(number(3)),
            );
        }

        if let Some(caps) = STAGE.captures(line) {
            let stage = caps[1].trim();
            self.activity.stage = if stage == FINISHED_STAGE {
                None
            } else {
                Some(stage.to_string())
            };
        }

        let saved = SAVED.captures(line).map(|caps| {
            let saved = caps[1].to_string();
            self.activity.last_saved_path = Some(saved.clone());
            PathBuf::from(saved)
        });

        let warning = if line.contains(UNABLE_TO_OPEN) || PATH_NOT_FOUND.is_match(line) {
            Some(line.trim().to_string())
        } else {
            None
        };

        ParseOutcome {
            updated: self.activity != before,
            warning,
            saved,
        }
    }

    /// 写回一次缩略图生成的结果，失败时只记录警告
    pub fn record_thumbnail(&mut self, result: FarmResult<PathBuf>) {
        match result {
            Ok(path) => {
                debug!("任务 {} 的缩略图已生成: {}", self.task_id, path.display());
                self.activity.thumbnail = Some(path.to_string_lossy().into_owned());
            }
            Err(e) => {
                warn!(
                    "任务 {} 生成缩略图失败，保留原缩略图: {}",
                    self.task_id, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderfarm_core::FarmError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingThumbnails {
        calls: Mutex<Vec<(PathBuf, i64)>>,
        fail: bool,
    }

    impl ThumbnailGenerator for CountingThumbnails {
        fn generate(&self, source: &Path, task_id: i64) -> FarmResult<PathBuf> {
            self.calls
                .lock()
                .unwrap()
                .push((source.to_path_buf(), task_id));
            if self.fail {
                return Err(FarmError::TaskExecution("convert not found".to_string()));
            }
            Ok(PathBuf::from(format!("/storage/thumbnail_{task_id}.png")))
        }
    }

    #[test]
    fn test_frame_stage_and_saved_with_single_thumbnail() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(42, &thumbnails);

        let outcome = parser.feed_line("Fra:42 | Rendering");
        assert!(outcome.updated);
        assert_eq!(parser.activity().current_frame, Some(42));
        assert_eq!(parser.activity().stage.as_deref(), Some("Rendering"));

        let outcome = parser.feed_line("Saved: '/tmp/out.png' ");
        assert!(outcome.updated);
        assert_eq!(parser.activity().last_saved_path.as_deref(), Some("/tmp/out.png"));
        assert_eq!(
            parser.activity().thumbnail.as_deref(),
            Some("/storage/thumbnail_42.png")
        );

        let calls = thumbnails.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (PathBuf::from("/tmp/out.png"), 42));
    }

    #[test]
    fn test_remaining_time_to_seconds() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(1, &thumbnails);

        parser.feed_line("Fra:3 Mem:12.00M | Time:00:01.20 | Remaining:01:02:03.45 | Path Tracing Tile 3/16");
        assert_eq!(parser.activity().remaining_seconds, Some(3723));
        assert_eq!(parser.activity().stage.as_deref(), Some("Path Tracing Tile 3/16"));

        parser.feed_line("Fra:3 Mem:12.00M | Time:00:02.20 | Remaining:00:03.45 | Rendering");
        assert_eq!(parser.activity().remaining_seconds, Some(3));
    }

    #[test]
    fn test_absurd_remaining_time_saturates() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(1, &thumbnails);

        parser.feed_line("Fra:1 | Remaining:18446744073709551615:59:59.00 | Rendering");
        assert_eq!(parser.activity().remaining_seconds, Some(u64::MAX));
    }

    #[test]
    fn test_parse_line_defers_thumbnail_to_caller() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(8, &thumbnails);

        let outcome = parser.parse_line("Saved: '/out/0008.png' Time: 00:03.10");
        assert_eq!(outcome.saved, Some(PathBuf::from("/out/0008.png")));
        assert_eq!(parser.activity().thumbnail, None);
        assert!(thumbnails.calls.lock().unwrap().is_empty());

        parser.record_thumbnail(Err(FarmError::TaskExecution("convert failed".to_string())));
        assert_eq!(parser.activity().thumbnail, None);

        parser.record_thumbnail(Ok(PathBuf::from("/storage/thumbnail_8.png")));
        assert_eq!(
            parser.activity().thumbnail.as_deref(),
            Some("/storage/thumbnail_8.png")
        );
    }

    #[test]
    fn test_finished_clears_stage() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(1, &thumbnails);

        parser.feed_line("Fra:1 | Rendering");
        let outcome = parser.feed_line("Fra:1 | Finished");
        assert!(outcome.updated);
        assert_eq!(parser.activity().stage, None);
    }

    #[test]
    fn test_unmatched_line_is_a_miss() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(1, &thumbnails);

        let outcome = parser.feed_line("Read blend: /shots/010.blend");
        assert_eq!(outcome, ParseOutcome::default());
        assert_eq!(parser.activity(), &TaskActivity::default());
    }

    #[test]
    fn test_thumbnail_failure_keeps_progress() {
        let thumbnails = CountingThumbnails {
            fail: true,
            ..Default::default()
        };
        let mut parser = RenderOutputParser::new(5, &thumbnails);

        let outcome = parser.feed_line("Saved: '/tmp/0001.png' Time: 00:01.00");
        assert!(outcome.updated);
        assert_eq!(parser.activity().last_saved_path.as_deref(), Some("/tmp/0001.png"));
        assert_eq!(parser.activity().thumbnail, None);
    }

    #[test]
    fn test_missing_asset_warnings() {
        let thumbnails = CountingThumbnails::default();
        let mut parser = RenderOutputParser::new(1, &thumbnails);

        let outcome = parser.feed_line("Warning: Path '//textures/wood.png' not found");
        assert_eq!(
            outcome.warning.as_deref(),
            Some("Warning: Path '//textures/wood.png' not found")
        );

        let outcome = parser.feed_line("Warning: Unable to open '/lib/props.blend'");
        assert!(outcome.warning.is_some());
        assert!(!outcome.updated);
    }
}
