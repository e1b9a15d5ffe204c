//! Redis 存储后端
//!
//! 聚合以 JSON 字符串保存，另用集合维护全部 ID，用哈希维护加入标签索引。
//! 键布局：
//! - `relay:user:{id}` / `relay:users`
//! - `relay:group:{id}` / `relay:groups`
//! - `relay:group_tags`（小写标签 -> 群组 ID）

mod group;
mod user;

pub use group::RedisGroupRepository;
pub use user::RedisUserRepository;

use domain::RepositoryError;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};

const KEY_PREFIX: &str = "relay";

/// 共享的 Redis 连接，按需派生各仓储
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let client = redis::Client::open(url)
            .map_err(|e| RepositoryError::storage_with_source("invalid redis url", e))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| RepositoryError::storage_with_source("Redis connection failed", e))?;
        tracing::info!(url = %url, "Redis 存储已连接");
        Ok(Self { connection })
    }

    pub fn user_repository(&self) -> RedisUserRepository {
        RedisUserRepository::new(self.connection.clone())
    }

    pub fn group_repository(&self) -> RedisGroupRepository {
        RedisGroupRepository::new(self.connection.clone())
    }
}

pub(crate) fn command_failed(err: redis::RedisError) -> RepositoryError {
    RepositoryError::storage_with_source("Redis operation failed", err)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::storage_with_source("failed to encode record", e))
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::storage_with_source("failed to decode record", e))
}

pub(crate) fn key(kind: &str, id: impl std::fmt::Display) -> String {
    format!("{KEY_PREFIX}:{kind}:{id}")
}
