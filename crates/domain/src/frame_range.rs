//! 帧范围编解码
//!
//! 帧范围字符串由逗号分隔的记号组成，每个记号是单个整数 `n`
//! 或闭区间 `a-b`，例如 `1-10,15,20-22`。

use std::collections::BTreeSet;

use renderfarm_core::{FarmError, FarmResult};

const FRAMES_KEY: &str = "frames";

/// 单个作业最多展开的帧数
pub const MAX_FRAMES: usize = 100_000;

/// 解析帧范围字符串，返回升序去重后的帧列表
pub fn parse_frame_range(expr: &str) -> FarmResult<Vec<i64>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(FarmError::invalid_setting(FRAMES_KEY, "帧范围不能为空"));
    }

    let mut frames = BTreeSet::new();
    for token in expr.split(',') {
        let token = token.trim();
        match token.split_once('-') {
            None => {
                let frame = parse_frame(token, expr)?;
                ensure_within_limit(FRAMES_KEY, frame, frame, frames.len())?;
                frames.insert(frame);
            }
            Some((start, end)) => {
                let start = parse_frame(start, expr)?;
                let end = parse_frame(end, expr)?;
                if start > end {
                    return Err(FarmError::invalid_setting(
                        FRAMES_KEY,
                        format!("区间起点大于终点: {token}"),
                    ));
                }
                ensure_within_limit(FRAMES_KEY, start, end, frames.len())?;
                frames.extend(start..=end);
            }
        }
    }

    Ok(frames.into_iter().collect())
}

/// 检查再展开闭区间 `start..=end` 后帧数不超过 [`MAX_FRAMES`]
///
/// `existing` 为已展开的帧数，重叠部分按新增计算。
pub(crate) fn ensure_within_limit(
    key: &str,
    start: i64,
    end: i64,
    existing: usize,
) -> FarmResult<()> {
    let span = i128::from(end) - i128::from(start) + 1;
    let total = span.saturating_add(existing as i128);
    if total > MAX_FRAMES as i128 {
        return Err(FarmError::invalid_setting(
            key,
            format!("帧数超过上限 {MAX_FRAMES}: {start}-{end}"),
        ));
    }
    Ok(())
}

fn parse_frame(raw: &str, expr: &str) -> FarmResult<i64> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FarmError::invalid_setting(
            FRAMES_KEY,
            format!("无法解析帧号 '{raw}'（帧范围: {expr}）"),
        ));
    }
    raw.parse::<i64>()
        .map_err(|e| FarmError::invalid_setting(FRAMES_KEY, format!("帧号 '{raw}' 无效: {e}")))
}

/// 将帧列表合并为最短的帧范围字符串
///
/// 连续整数的最长区段折叠为 `a-b`，孤立帧保持原样。空输入返回空字符串。
pub fn merge_frames(frames: &[i64]) -> String {
    let sorted: BTreeSet<i64> = frames.iter().copied().collect();
    let mut ranges: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();

    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut prev) = (first, first);
    for frame in iter {
        if frame == prev + 1 {
            prev = frame;
            continue;
        }
        ranges.push(format_run(start, prev));
        start = frame;
        prev = frame;
    }
    ranges.push(format_run(start, prev));

    ranges.join(",")
}

fn format_run(start: i64, end: i64) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// 将有序帧列表切分为固定大小的块，最后一块可以更短
pub fn chunk_frames(frames: &[i64], chunk_size: usize) -> Vec<Vec<i64>> {
    if chunk_size == 0 {
        return vec![frames.to_vec()];
    }
    frames.chunks(chunk_size).map(<[i64]>::to_vec).collect()
}
