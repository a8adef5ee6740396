//! 渲染农场领域逻辑
//!
//! 这里的一切都是纯计算：帧范围编解码、作业分解、命令编译、
//! 任务生命周期状态机与渲染输出解析。注册表在启动时构造一次，
//! 通过引用传给调用方，不存在全局状态。

pub mod frame_range;
pub mod job_compilers;
pub mod lifecycle;
pub mod output_parser;
pub mod settings;
pub mod task_compilers;

pub use frame_range::{chunk_frames, merge_frames, parse_frame_range, MAX_FRAMES};
pub use job_compilers::JobCompilerRegistry;
pub use lifecycle::{
    aggregate_job_status, validate_report_transition, validate_transition, JobStatusPolicy,
};
pub use output_parser::{ParseOutcome, RenderOutputParser, ThumbnailGenerator};
pub use settings::{JobSettings, Platform};
pub use task_compilers::{
    resolve_placeholders, AuxiliaryFileSink, CompiledCommand, PlaceholderValues,
    TaskCompilerRegistry,
};
