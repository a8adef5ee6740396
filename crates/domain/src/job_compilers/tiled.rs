use serde_json::Value;

use renderfarm_core::{FarmError, FarmResult, Job, TaskDraft};

use super::{base_settings, job_types, task_priority};
use crate::frame_range::parse_frame_range;
use crate::settings::JobSettings;
use crate::task_compilers::task_types;

pub const DEFAULT_TILES: i64 = 4;
pub const MAX_TILES: i64 = 1024;

/// 分块渲染：一个合成任务加上 `tiles` 个分块任务
///
/// 合成任务排在第一位，每个分块的依赖指针都指向它，
/// 合成任务只有在全部分块完成后才可被派发。
pub fn compile_tiled_render(job: &Job) -> FarmResult<Vec<TaskDraft>> {
    let settings = JobSettings::new(&job.settings)?;
    let mut base = base_settings(&settings)?;
    let format = settings.required_str("format")?;
    base.insert("format".to_string(), Value::from(format));

    let frames = parse_frame_range(settings.required_str("frames")?)?;
    let (Some(&frame_start), Some(&frame_end)) = (frames.first(), frames.last()) else {
        return Err(FarmError::invalid_setting("frames", "帧范围不能为空"));
    };

    let tiles = settings.optional_i64("tiles")?.unwrap_or(DEFAULT_TILES);
    if tiles < 1 {
        return Err(FarmError::invalid_setting("tiles", "分块数量必须至少为1"));
    }
    if tiles > MAX_TILES {
        return Err(FarmError::invalid_setting(
            "tiles",
            format!("分块数量不能超过 {MAX_TILES}"),
        ));
    }
    let priority = task_priority(job, &settings)?;

    base.insert("tiles".to_string(), Value::from(tiles));
    base.insert("frame_start".to_string(), Value::from(frame_start));
    base.insert("frame_end".to_string(), Value::from(frame_end));

    let mut drafts = Vec::with_capacity(tiles as usize + 1);
    drafts.push(TaskDraft {
        name: "Mixing".to_string(),
        task_type: task_types::TILED_BLENDER_RENDER_SIMPLE_MIX.to_string(),
        settings: Value::Object(base.clone()),
        priority,
        blocks: None,
    });

    for tile in 0..tiles {
        let mut tile_settings = base.clone();
        tile_settings.insert("tile".to_string(), Value::from(tile));
        drafts.push(TaskDraft {
            name: format!("Tile {tile}"),
            task_type: job_types::TILED_BLENDER_RENDER.to_string(),
            settings: Value::Object(tile_settings),
            priority,
            blocks: Some(0),
        });
    }

    Ok(drafts)
}
