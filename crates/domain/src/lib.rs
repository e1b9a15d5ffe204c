//! 群聊中继系统核心领域模型
//!
//! 包含用户、群组两个聚合，以及成员变更、所有权转移等纯业务规则。
//! 本 crate 不做任何 I/O。

pub mod errors;
pub mod group;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use group::*;
pub use user::*;
pub use value_objects::*;
