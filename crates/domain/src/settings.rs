use serde_json::{Map, Value};

use renderfarm_core::{FarmError, FarmResult};

/// 作业/任务设置的只读访问器
///
/// 所有必需项缺失都会返回 `MissingSetting`，类型不符返回 `InvalidSetting`，
/// 两者都属于设置类错误，作业会在生成任何任务之前被拒绝。
#[derive(Debug, Clone, Copy)]
pub struct JobSettings<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> JobSettings<'a> {
    pub fn new(settings: &'a Value) -> FarmResult<Self> {
        settings
            .as_object()
            .map(|map| Self { map })
            .ok_or_else(|| FarmError::invalid_setting("settings", "设置必须是JSON对象"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn required(&self, key: &str) -> FarmResult<&'a Value> {
        self.get(key).ok_or_else(|| FarmError::missing_setting(key))
    }

    pub fn required_str(&self, key: &str) -> FarmResult<&'a str> {
        self.required(key)?
            .as_str()
            .ok_or_else(|| FarmError::invalid_setting(key, "必须是字符串"))
    }

    pub fn optional_str(&self, key: &str) -> FarmResult<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| FarmError::invalid_setting(key, "必须是字符串")),
        }
    }

    /// 读取整数设置，兼容以字符串形式提交的数字
    pub fn required_i64(&self, key: &str) -> FarmResult<i64> {
        let value = self.required(key)?;
        value_as_i64(value).ok_or_else(|| FarmError::invalid_setting(key, "必须是整数"))
    }

    pub fn optional_i64(&self, key: &str) -> FarmResult<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => value_as_i64(v)
                .map(Some)
                .ok_or_else(|| FarmError::invalid_setting(key, "必须是整数")),
        }
    }

    pub fn positive_usize(&self, key: &str) -> FarmResult<usize> {
        let value = self.required_i64(key)?;
        if value <= 0 {
            return Err(FarmError::invalid_setting(key, "必须大于0"));
        }
        usize::try_from(value).map_err(|e| FarmError::invalid_setting(key, e.to_string()))
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 任务执行所在的主机平台
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::Windows, Platform::MacOs];

    /// 当前进程所在平台
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// 任务设置中的平台后缀
    pub fn suffix(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "win",
            Platform::MacOs => "osx",
        }
    }

    pub fn file_path_key(&self) -> String {
        format!("file_path_{}", self.suffix())
    }

    pub fn output_path_key(&self) -> String {
        format!("output_path_{}", self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_missing_and_invalid() {
        let value = json!({"filepath": "shot.blend", "chunk_size": "5", "bad": [1], "nothing": null});
        let settings = JobSettings::new(&value).unwrap();

        assert_eq!(settings.required_str("filepath").unwrap(), "shot.blend");
        assert_eq!(settings.required_i64("chunk_size").unwrap(), 5);
        assert!(matches!(
            settings.required_str("format"),
            Err(FarmError::MissingSetting { .. })
        ));
        assert!(matches!(
            settings.required_str("bad"),
            Err(FarmError::InvalidSetting { .. })
        ));
        // null 视为缺失
        assert!(!settings.contains("nothing"));
        assert!(settings.required("nothing").is_err());
    }

    #[test]
    fn test_positive_usize_rejects_zero() {
        let value = json!({"chunk_size": 0});
        let settings = JobSettings::new(&value).unwrap();
        assert!(settings.positive_usize("chunk_size").is_err());
    }

    #[test]
    fn test_non_object_settings_rejected() {
        let value = json!(["frames"]);
        assert!(JobSettings::new(&value).unwrap_err().is_settings_error());
    }

    #[test]
    fn test_platform_keys() {
        assert_eq!(Platform::Windows.file_path_key(), "file_path_win");
        assert_eq!(Platform::MacOs.output_path_key(), "output_path_osx");
    }
}
