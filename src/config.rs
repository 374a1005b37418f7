use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DumpError, Result};

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// 运行配置（可从 TOML 加载，缺省字段取默认值）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub network: NetworkConfig,
    pub completion: CompletionConfig,
    pub follow: FollowConfig,
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// BinarySource 缓冲区大小
    pub read_buffer_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 256 * KB,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// 接收窗口：写满后落盘到 spill 文件
    pub receive_window: usize,
    pub spill_dir: PathBuf,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            receive_window: 10 * MB,
            spill_dir: default_spill_dir(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub workers: usize,
    /// end 未知时的最大重试次数
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().clamp(1, 8),
            retry_attempts: 10,
            retry_delay_ms: 5000,
        }
    }
}

impl CompletionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// EOF 后等待文件继续增长的时长
    pub idle_timeout_ms: u64,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 2000,
        }
    }
}

impl FollowConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 4445,
        }
    }
}

fn default_spill_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("bgv-lazy"))
        .unwrap_or_else(|| std::env::temp_dir().join("bgv-lazy"))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(text).map_err(|e| DumpError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.read_buffer_size < 16 {
            return Err(DumpError::Config(format!(
                "scan.read_buffer_size too small: {}",
                self.scan.read_buffer_size
            )));
        }
        if self.network.receive_window == 0 {
            return Err(DumpError::Config("network.receive_window must be > 0".into()));
        }
        if self.completion.workers == 0 {
            return Err(DumpError::Config("completion.workers must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = Config::from_toml(
            r#"
            [completion]
            retry_attempts = 3
            retry_delay_ms = 20

            [network]
            receive_window = 4096
            "#,
        )
        .unwrap();
        assert_eq!(cfg.completion.retry_attempts, 3);
        assert_eq!(cfg.completion.retry_delay(), Duration::from_millis(20));
        assert_eq!(cfg.network.receive_window, 4096);
        assert_eq!(cfg.scan.read_buffer_size, 256 * KB);
        assert_eq!(cfg.server.port, 4445);
        assert!(cfg.completion.workers >= 1);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::from_toml("[completion]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }

    #[test]
    fn garbage_toml_is_config_error() {
        let err = Config::from_toml("scan = [").unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
    }
}
