use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sqlite_text_enum;

/// 已注册的 Manager 节点
///
/// 以 (host, port) 唯一标识，代表一个或多个 Worker 向服务器轮询任务。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manager {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capacity: ManagerCapacity,
    pub status: ManagerStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_probe_error: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl Manager {
    /// 存活探测地址
    pub fn probe_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Manager 容量：固定 Worker 数量或虚拟（不限）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "workers", rename_all = "lowercase")]
pub enum ManagerCapacity {
    Fixed(u32),
    Virtual,
}

impl ManagerCapacity {
    pub fn is_virtual(&self) -> bool {
        matches!(self, ManagerCapacity::Virtual)
    }

    pub fn total_workers(&self) -> Option<u32> {
        match self {
            ManagerCapacity::Fixed(n) => Some(*n),
            ManagerCapacity::Virtual => None,
        }
    }
}

/// Manager 注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerRegistration {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capacity: ManagerCapacity,
}

/// 可达性状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManagerStatus {
    Online,
    Offline,
    Unknown,
}

impl ManagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerStatus::Online => "online",
            ManagerStatus::Offline => "offline",
            ManagerStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManagerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ManagerStatus::Online),
            "offline" => Ok(ManagerStatus::Offline),
            "unknown" => Ok(ManagerStatus::Unknown),
            _ => Err(format!("Invalid manager status: {s}")),
        }
    }
}

sqlite_text_enum!(ManagerStatus);

/// 存活探测结果
///
/// 探测失败不是错误，只是一个状态标记。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable(String),
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }

    pub fn status(&self) -> ManagerStatus {
        match self {
            Reachability::Reachable => ManagerStatus::Online,
            Reachability::Unreachable(_) => ManagerStatus::Offline,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Reachability::Reachable => None,
            Reachability::Unreachable(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_serialization() {
        let fixed = serde_json::to_value(ManagerCapacity::Fixed(4)).unwrap();
        assert_eq!(fixed, serde_json::json!({"kind": "fixed", "workers": 4}));

        let virt: ManagerCapacity = serde_json::from_str(r#"{"kind":"virtual"}"#).unwrap();
        assert!(virt.is_virtual());
        assert_eq!(virt.total_workers(), None);
    }

    #[test]
    fn test_reachability_maps_to_status() {
        assert_eq!(Reachability::Reachable.status(), ManagerStatus::Online);
        let down = Reachability::Unreachable("连接被拒绝".to_string());
        assert_eq!(down.status(), ManagerStatus::Offline);
        assert_eq!(down.reason(), Some("连接被拒绝"));
    }
}
