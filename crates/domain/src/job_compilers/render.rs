use serde_json::Value;

use renderfarm_core::{FarmError, FarmResult, Job, TaskDraft};

use super::{base_settings, job_types, task_priority};
use crate::frame_range::{chunk_frames, ensure_within_limit, merge_frames, parse_frame_range};
use crate::settings::JobSettings;

/// 按 `chunk_size` 切块，每块生成一个互不依赖的渲染任务
pub fn compile_simple_render(job: &Job) -> FarmResult<Vec<TaskDraft>> {
    let settings = JobSettings::new(&job.settings)?;
    let mut base = base_settings(&settings)?;
    let format = settings.required_str("format")?;
    base.insert("format".to_string(), Value::from(format));

    let frames = parse_frame_range(settings.required_str("frames")?)?;
    let chunk_size = settings.positive_usize("chunk_size")?;
    let priority = task_priority(job, &settings)?;

    let drafts = chunk_frames(&frames, chunk_size)
        .into_iter()
        .map(|chunk| {
            let merged = merge_frames(&chunk);
            let mut task_settings = base.clone();
            task_settings.insert("frames".to_string(), Value::from(merged.clone()));
            TaskDraft {
                name: merged,
                task_type: job_types::BLENDER_SIMPLE_RENDER.to_string(),
                settings: Value::Object(task_settings),
                priority,
                blocks: None,
            }
        })
        .collect();

    Ok(drafts)
}

/// 与简单渲染相同的切块方式，每块额外携带连续区间的起止帧
///
/// 帧集合取自 `frames`；缺省时使用 `frame_start..=frame_end`。
pub fn compile_turbo_render(job: &Job) -> FarmResult<Vec<TaskDraft>> {
    let settings = JobSettings::new(&job.settings)?;
    let mut base = base_settings(&settings)?;
    let format = settings.required_str("format")?;
    base.insert("format".to_string(), Value::from(format));

    let frames = turbo_frames(&settings)?;
    let chunk_size = settings.positive_usize("chunk_size")?;
    let priority = task_priority(job, &settings)?;

    let mut drafts = Vec::new();
    for chunk in chunk_frames(&frames, chunk_size) {
        let (Some(&first), Some(&last)) = (chunk.first(), chunk.last()) else {
            continue;
        };
        let merged = merge_frames(&chunk);
        let mut task_settings = base.clone();
        task_settings.insert("frames".to_string(), Value::from(merged.clone()));
        task_settings.insert("frame_start".to_string(), Value::from(first));
        task_settings.insert("frame_end".to_string(), Value::from(last));
        drafts.push(TaskDraft {
            name: merged,
            task_type: job_types::BLENDER_SIMPLE_RENDER_TURBO.to_string(),
            settings: Value::Object(task_settings),
            priority,
            blocks: None,
        });
    }

    Ok(drafts)
}

fn turbo_frames(settings: &JobSettings<'_>) -> FarmResult<Vec<i64>> {
    if let Some(expr) = settings.optional_str("frames")? {
        return parse_frame_range(expr);
    }

    let start = settings.required_i64("frame_start")?;
    let end = settings.required_i64("frame_end")?;
    if start > end {
        return Err(FarmError::invalid_setting(
            "frame_end",
            format!("结束帧 {end} 小于起始帧 {start}"),
        ));
    }
    ensure_within_limit("frame_end", start, end, 0)?;
    Ok((start..=end).collect())
}
