//! 基础设施层实现。
//!
//! 提供 JWT 令牌服务与 Redis 存储仓储，实现应用层定义的接口。

pub mod repository;
pub mod token;

pub use repository::{RedisGroupRepository, RedisStore, RedisUserRepository};
pub use token::{Claims, JwtTokenService};
