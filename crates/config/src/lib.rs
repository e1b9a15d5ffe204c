//! 统一配置中心
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//! - 内置默认值（仅适合开发环境）
//! - 工作目录下的 `relay.yaml`（可选）
//! - `RELAY_` 前缀的环境变量，嵌套字段用 `__` 分隔，例如 `RELAY_JWT__SECRET`

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "relay.yaml";
pub const ENV_PREFIX: &str = "RELAY_";

const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 连接中心配置
    pub hub: HubConfig,
    /// 存储后端配置
    pub storage: StorageConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 连接中心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub command_capacity: usize,
    pub outbox_capacity: usize,
    /// 空群组被删除前的宽限期（秒）
    pub group_cleanup_grace_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub redis_url: String,
}

impl Default for AppConfig {
    /// 开发环境默认值，生产环境必须覆盖 JWT 密钥
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                expiration_hours: 24,
            },
            hub: HubConfig {
                command_capacity: 1024,
                outbox_capacity: 256,
                group_cleanup_grace_secs: 300,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                redis_url: "redis://127.0.0.1:6379".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 默认值 + `relay.yaml` + 环境变量
    pub fn figment() -> Figment {
        Self::figment_with_file(CONFIG_FILE)
    }

    pub fn figment_with_file(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否仍在使用内置的开发密钥
    pub fn uses_development_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // JWT 密钥至少 256 位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration_hours must be positive".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.hub.command_capacity == 0 || self.hub.outbox_capacity == 0 {
            return Err(ConfigError::InvalidHubConfig(
                "queue capacities must be greater than 0".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Redis && self.storage.redis_url.trim().is_empty()
        {
            return Err(ConfigError::InvalidStorageConfig(
                "redis_url is required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid hub configuration: {0}")]
    InvalidHubConfig(String),
    #[error("Invalid storage configuration: {0}")]
    InvalidStorageConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert!(config.uses_development_secret());
        assert_eq!(config.hub.group_cleanup_grace_secs, 300);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("RELAY_SERVER__PORT", "9000");
            jail.set_env("RELAY_JWT__SECRET", "an-operator-supplied-secret-of-40-chars!!");
            jail.set_env("RELAY_HUB__GROUP_CLEANUP_GRACE_SECS", "30");
            jail.set_env("RELAY_STORAGE__BACKEND", "redis");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.hub.group_cleanup_grace_secs, 30);
            assert_eq!(config.storage.backend, StorageBackend::Redis);
            assert!(!config.uses_development_secret());
            assert_eq!(config.server_addr(), "127.0.0.1:9000");
            Ok(())
        });
    }

    #[test]
    fn yaml_file_is_layered_under_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
server:
  host: 0.0.0.0
  port: 7000
hub:
  outbox_capacity: 8
"#,
            )?;
            jail.set_env("RELAY_SERVER__PORT", "7001");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 7001);
            assert_eq!(config.hub.outbox_capacity, 8);
            assert_eq!(config.hub.command_capacity, 1024);
            Ok(())
        });
    }

    #[test]
    fn short_secret_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("RELAY_JWT__SECRET", "short");
            match AppConfig::load() {
                Err(ConfigError::InvalidJwtSecret(_)) => Ok(()),
                other => Err(format!("unexpected result: {other:?}").into()),
            }
        });
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = AppConfig::default();
        config.hub.outbox_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHubConfig(_))
        ));
    }
}
