use renderfarm_core::{FarmError, FarmResult, Task};

use super::scripts::{self, render_script, PyValue};
use super::{join_path, AuxiliaryFileSink, CompiledCommand, COMMAND, JOB_PATH, OUTPUT_PATH};
use crate::frame_range::{merge_frames, parse_frame_range};
use crate::job_compilers::DEFAULT_OUTPUT_PATTERN;
use crate::settings::{JobSettings, Platform};

/// 编译时需要的任务设置视图
struct RenderTask<'a> {
    task: &'a Task,
    settings: JobSettings<'a>,
    platform: Platform,
}

impl<'a> RenderTask<'a> {
    fn new(task: &'a Task, platform: Platform) -> FarmResult<Self> {
        Ok(Self {
            task,
            settings: JobSettings::new(&task.settings)?,
            platform,
        })
    }

    /// 当前平台的源文件路径，平台字段为空时回退到 `filepath`
    fn file_path(&self) -> FarmResult<String> {
        let key = self.platform.file_path_key();
        let path = match self.settings.optional_str(&key)? {
            Some(p) if !p.trim().is_empty() => p,
            _ => self.settings.required_str("filepath")?,
        };
        Ok(join_path(JOB_PATH, path))
    }

    fn output_path(&self) -> FarmResult<String> {
        let key = self.platform.output_path_key();
        let path = match self.settings.optional_str(&key)? {
            Some(p) if !p.trim().is_empty() => p,
            _ => DEFAULT_OUTPUT_PATTERN,
        };
        Ok(join_path(OUTPUT_PATH, path))
    }

    fn format(&self) -> FarmResult<&'a str> {
        self.settings.required_str("format")
    }

    fn frame_span(&self) -> FarmResult<(i64, i64)> {
        Ok((
            self.settings.required_i64("frame_start")?,
            self.settings.required_i64("frame_end")?,
        ))
    }

    fn add_script(
        &self,
        sink: &mut dyn AuxiliaryFileSink,
        contents: &str,
        filename: &str,
    ) -> FarmResult<String> {
        sink.add_file(contents, filename, self.task.job_id)?;
        Ok(join_path(JOB_PATH, filename))
    }
}

/// 帧范围字符串转为 Blender 的帧参数
///
/// 单帧为 `-f N`，区间为 `--frame-start a --frame-end b --render-anim`。
pub fn frame_arguments(frames: &str) -> FarmResult<Vec<String>> {
    // 先规范化，保证每个记号都是合法的单帧或升序区间
    let normalized = merge_frames(&parse_frame_range(frames)?);
    let mut args = Vec::new();
    for token in normalized.split(',') {
        match token.split_once('-') {
            None => {
                args.push("-f".to_string());
                args.push(token.to_string());
            }
            Some((start, end)) => {
                args.extend([
                    "--frame-start".to_string(),
                    start.to_string(),
                    "--frame-end".to_string(),
                    end.to_string(),
                    "--render-anim".to_string(),
                ]);
            }
        }
    }
    Ok(args)
}

fn pre_render_script(render: &RenderTask<'_>) -> FarmResult<String> {
    let render_settings = match render.settings.optional_str("render_settings")? {
        Some(path) => PyValue::Str(path.to_string()),
        None => PyValue::None,
    };
    Ok(render_script(
        scripts::PRE_RENDER,
        &[("render_settings", render_settings)],
    ))
}

pub fn compile_simple_render(
    task: &Task,
    platform: Platform,
    sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let render = RenderTask::new(task, platform)?;
    let file_path = render.file_path()?;
    let output_path = render.output_path()?;
    let format = render.format()?;
    let frames = frame_arguments(render.settings.required_str("frames")?)?;
    let script_path = render.add_script(sink, &pre_render_script(&render)?, "pre_render.py")?;

    let mut argv = vec![
        COMMAND.to_string(),
        "--enable-autoexec".to_string(),
        "-noaudio".to_string(),
        "--background".to_string(),
        file_path,
        "--render-output".to_string(),
        output_path,
        "--python".to_string(),
        script_path,
        "--render-format".to_string(),
        format.to_string(),
    ];
    argv.extend(frames);

    Ok(CompiledCommand::new(argv))
}

pub fn compile_turbo_render(
    task: &Task,
    platform: Platform,
    sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let render = RenderTask::new(task, platform)?;
    let file_path = render.file_path()?;
    let output_path = render.output_path()?;
    let format = render.format()?;
    let (frame_start, frame_end) = render.frame_span()?;
    let script_path = render.add_script(sink, &pre_render_script(&render)?, "pre_render.py")?;

    Ok(CompiledCommand::new([
        COMMAND.to_string(),
        "-noaudio".to_string(),
        "--background".to_string(),
        file_path,
        "--render-output".to_string(),
        output_path,
        "--python".to_string(),
        script_path,
        "--frame-start".to_string(),
        frame_start.to_string(),
        "--frame-end".to_string(),
        frame_end.to_string(),
        "--render-format".to_string(),
        format.to_string(),
        "--render-anim".to_string(),
        "--enable-autoexec".to_string(),
    ]))
}

/// 单个分块：输出前缀为 `tiled_<n>_`
pub fn compile_tiled_tile(
    task: &Task,
    platform: Platform,
    sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let render = RenderTask::new(task, platform)?;
    let file_path = render.file_path()?;
    let (frame_start, frame_end) = render.frame_span()?;
    let tile = render.settings.required_i64("tile")?;
    let tiles = render.settings.required_i64("tiles")?;
    if tile < 0 || tile >= tiles {
        return Err(FarmError::invalid_setting(
            "tile",
            format!("分块序号 {tile} 超出范围 0..{tiles}"),
        ));
    }

    let script = render_script(
        scripts::TILE,
        &[("tile", PyValue::Int(tile)), ("tiles", PyValue::Int(tiles))],
    );
    let script_path = render.add_script(sink, &script, &format!("tile_{tile}.py"))?;
    let tile_output = join_path(OUTPUT_PATH, &format!("tiled_{tile}_"));

    Ok(CompiledCommand::new([
        COMMAND.to_string(),
        "--background".to_string(),
        file_path,
        "--render-output".to_string(),
        tile_output,
        "--python".to_string(),
        script_path,
        "--frame-start".to_string(),
        frame_start.to_string(),
        "--frame-end".to_string(),
        frame_end.to_string(),
        "--render-anim".to_string(),
        "--enable-autoexec".to_string(),
    ]))
}

/// 合成全部分块的结果
pub fn compile_tiled_mix(
    task: &Task,
    platform: Platform,
    sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let render = RenderTask::new(task, platform)?;
    let file_path = render.file_path()?;
    let format = render.format()?;
    let (frame_start, frame_end) = render.frame_span()?;
    let tiles = render.settings.required_i64("tiles")?;

    let script = render_script(
        scripts::TILE_MIX,
        &[
            (
                "tiles_path",
                PyValue::Str("tiled_{tile}_{frame:04d}.exr".to_string()),
            ),
            ("tiles", PyValue::Int(tiles)),
        ],
    );
    let script_path = render.add_script(sink, &script, "tile_mix.py")?;

    Ok(CompiledCommand::new([
        COMMAND.to_string(),
        "--background".to_string(),
        "-noaudio".to_string(),
        file_path,
        "--render-output".to_string(),
        join_path(OUTPUT_PATH, ""),
        "--python".to_string(),
        script_path,
        "--frame-start".to_string(),
        frame_start.to_string(),
        "--frame-end".to_string(),
        frame_end.to_string(),
        "--render-format".to_string(),
        format.to_string(),
        "--render-anim".to_string(),
        "--enable-autoexec".to_string(),
        "--".to_string(),
        "--tiles-dir".to_string(),
        OUTPUT_PATH.to_string(),
    ]))
}

pub fn compile_bake_anim_cache(
    task: &Task,
    platform: Platform,
    sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let render = RenderTask::new(task, platform)?;
    let file_path = render.file_path()?;
    let script_path = render.add_script(sink, scripts::BAKE_ANIM_CACHE, "bake_anim_cache.py")?;

    Ok(CompiledCommand::new([
        COMMAND.to_string(),
        "-noaudio".to_string(),
        "--background".to_string(),
        file_path,
        "--python".to_string(),
        script_path,
        "--enable-autoexec".to_string(),
    ]))
}

/// OpenGL 渲染在前台运行并连接本地显示
pub fn compile_opengl_render(
    task: &Task,
    platform: Platform,
    sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let render = RenderTask::new(task, platform)?;
    let file_path = render.file_path()?;
    let output_path = render.output_path()?;
    let format = render.format()?;
    let (frame_start, frame_end) = render.frame_span()?;
    let script_path =
        render.add_script(sink, scripts::OPENGL_RENDER, "blender_opengl_render.py")?;

    Ok(CompiledCommand::new([
        COMMAND.to_string(),
        "-noaudio".to_string(),
        file_path,
        "--python".to_string(),
        script_path,
        "--enable-autoexec".to_string(),
        // 分隔符之后的参数只由脚本读取
        "--".to_string(),
        "--render-output".to_string(),
        output_path,
        "--frame-start".to_string(),
        frame_start.to_string(),
        "--frame-end".to_string(),
        frame_end.to_string(),
        "--render-format".to_string(),
        format.to_string(),
    ])
    .with_env("DISPLAY", ":0.0")
    .in_foreground())
}
