use serde_json::Value;

use renderfarm_core::{FarmError, FarmResult, Task};

use super::{AuxiliaryFileSink, CompiledCommand};
use crate::settings::Platform;

/// 字符串命令交给平台 shell，数组命令直接执行
pub fn compile_exec_command(
    task: &Task,
    platform: Platform,
    _sink: &mut dyn AuxiliaryFileSink,
) -> FarmResult<CompiledCommand> {
    let args = match task.settings.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => strings(values, "args")?,
        Some(_) => return Err(FarmError::invalid_setting("args", "必须是字符串数组")),
    };

    let argv = match task.settings.get("command") {
        Some(Value::String(cmd)) if !cmd.trim().is_empty() => {
            let mut line = cmd.trim().to_string();
            for arg in &args {
                line.push(' ');
                line.push_str(arg);
            }
            let (shell, flag) = match platform {
                Platform::Windows => ("cmd", "/C"),
                Platform::Linux | Platform::MacOs => ("sh", "-c"),
            };
            vec![shell.to_string(), flag.to_string(), line]
        }
        Some(Value::Array(values)) if !values.is_empty() => {
            let mut argv = strings(values, "command")?;
            argv.extend(args);
            argv
        }
        None | Some(Value::Null) => return Err(FarmError::missing_setting("command")),
        Some(_) => {
            return Err(FarmError::invalid_setting(
                "command",
                "必须是非空字符串或非空字符串数组",
            ))
        }
    };

    Ok(CompiledCommand::new(argv))
}

fn strings(values: &[Value], key: &str) -> FarmResult<Vec<String>> {
    values
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| FarmError::invalid_setting(key, "数组元素必须是字符串"))
        })
        .collect()
}
