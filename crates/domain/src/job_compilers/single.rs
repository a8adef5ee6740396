use serde_json::{Map, Value};

use renderfarm_core::{FarmError, FarmResult, Job, TaskDraft};

use super::{base_settings, job_types, task_priority};
use crate::frame_range::{merge_frames, parse_frame_range};
use crate::settings::JobSettings;

fn single(
    name: String,
    task_type: &str,
    settings: Map<String, Value>,
    priority: i32,
) -> Vec<TaskDraft> {
    vec![TaskDraft {
        name,
        task_type: task_type.to_string(),
        settings: Value::Object(settings),
        priority,
        blocks: None,
    }]
}

pub fn compile_bake_anim_cache(job: &Job) -> FarmResult<Vec<TaskDraft>> {
    let settings = JobSettings::new(&job.settings)?;
    let base = base_settings(&settings)?;
    let filepath = settings.required_str("filepath")?;
    let priority = task_priority(job, &settings)?;

    Ok(single(
        format!("Bake Anim Cache - {filepath}"),
        job_types::BLENDER_BAKE_ANIM_CACHE,
        base,
        priority,
    ))
}

/// OpenGL 渲染需要图形上下文，整个帧区间在一个任务里完成
pub fn compile_opengl_render(job: &Job) -> FarmResult<Vec<TaskDraft>> {
    let settings = JobSettings::new(&job.settings)?;
    let mut base = base_settings(&settings)?;
    let format = settings.required_str("format")?;
    base.insert("format".to_string(), Value::from(format));

    let frames = parse_frame_range(settings.required_str("frames")?)?;
    let (Some(&frame_start), Some(&frame_end)) = (frames.first(), frames.last()) else {
        return Err(FarmError::invalid_setting("frames", "帧范围不能为空"));
    };
    let merged = merge_frames(&frames);
    base.insert("frames".to_string(), Value::from(merged.clone()));
    base.insert("frame_start".to_string(), Value::from(frame_start));
    base.insert("frame_end".to_string(), Value::from(frame_end));
    let priority = task_priority(job, &settings)?;

    Ok(single(
        format!("OpenGL Render {merged}"),
        job_types::BLENDER_OPENGL_RENDER,
        base,
        priority,
    ))
}

/// 执行任意命令
///
/// `command` 为字符串时交给平台 shell 执行，为字符串数组时直接作为 argv。
pub fn compile_exec_command(job: &Job) -> FarmResult<Vec<TaskDraft>> {
    let settings = JobSettings::new(&job.settings)?;
    let command = settings.required("command")?;

    let program = match command {
        Value::String(cmd) if !cmd.trim().is_empty() => cmd.trim().to_string(),
        Value::Array(parts) if !parts.is_empty() => {
            let parts = string_list(parts, "command")?;
            parts[0].clone()
        }
        _ => {
            return Err(FarmError::invalid_setting(
                "command",
                "必须是非空字符串或非空字符串数组",
            ))
        }
    };

    let mut task_settings = Map::new();
    task_settings.insert("command".to_string(), command.clone());
    if let Some(args) = settings.get("args") {
        let list = args
            .as_array()
            .ok_or_else(|| FarmError::invalid_setting("args", "必须是字符串数组"))?;
        string_list(list, "args")?;
        task_settings.insert("args".to_string(), args.clone());
    }
    let priority = task_priority(job, &settings)?;

    Ok(single(
        format!("Exec {program}"),
        job_types::EXEC_COMMAND,
        task_settings,
        priority,
    ))
}

fn string_list(values: &[Value], key: &str) -> FarmResult<Vec<String>> {
    values
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| FarmError::invalid_setting(key, "数组元素必须是字符串"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::job;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bake_emits_one_named_task() {
        let drafts = compile_bake_anim_cache(&job(
            job_types::BLENDER_BAKE_ANIM_CACHE,
            json!({"filepath": "chars/hero.blend"}),
        ))
        .unwrap();

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "Bake Anim Cache - chars/hero.blend");
        assert_eq!(drafts[0].settings["output_path_linux"], "#####");
    }

    #[test]
    fn test_opengl_sets_frame_span() {
        let drafts = compile_opengl_render(&job(
            job_types::BLENDER_OPENGL_RENDER,
            json!({"filepath": "layout.blend", "format": "PNG", "frames": "5-9,20"}),
        ))
        .unwrap();

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].settings["frame_start"], 5);
        assert_eq!(drafts[0].settings["frame_end"], 20);
    }

    #[test]
    fn test_exec_command_accepts_string_and_array() {
        let drafts = compile_exec_command(&job(
            job_types::EXEC_COMMAND,
            json!({"command": "echo hello"}),
        ))
        .unwrap();
        assert_eq!(drafts[0].name, "Exec echo hello");

        let drafts = compile_exec_command(&job(
            job_types::EXEC_COMMAND,
            json!({"command": ["sleep", "1"], "args": ["--verbose"]}),
        ))
        .unwrap();
        assert_eq!(drafts[0].name, "Exec sleep");
        assert_eq!(drafts[0].settings["args"], json!(["--verbose"]));
    }

    #[test]
    fn test_exec_command_rejects_bad_shapes() {
        for settings in [
            json!({}),
            json!({"command": ""}),
            json!({"command": []}),
            json!({"command": [1, 2]}),
            json!({"command": "ls", "args": "-la"}),
        ] {
            let err = compile_exec_command(&job(job_types::EXEC_COMMAND, settings)).unwrap_err();
            assert!(err.is_settings_error());
        }
    }
}
