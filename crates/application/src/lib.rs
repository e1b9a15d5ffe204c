//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务（用户、群组生命周期）、客户端协议定义，
//! 以及串行处理所有连接事件的连接中心。存储与令牌通过 trait 抽象，
//! 具体实现由基础设施层提供。

pub mod clock;
pub mod dto;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod repository;
pub mod services;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use dto::{GroupDto, GroupSummaryDto, MemberDto, UserDto};
pub use error::{ApplicationError, ErrorCode};
pub use hub::{
    Connection, ConnectionId, Hub, HubError, HubHandle, HubServices, HubSettings, HubStats,
};
pub use protocol::{ClientCommand, ClientEnvelope, ProtocolError, ServerMessage};
pub use repository::{
    memory::{MemoryGroupRepository, MemoryUserRepository},
    GroupRepository, UserRepository,
};
pub use services::{
    CreateGroupRequest, GroupRef, GroupService, GroupServiceDependencies, JoinGroupRequest,
    JoinOutcome, LeaveGroupRequest, LeaveOutcome, RegisterUserRequest, UpdateGroupRequest,
    UpdateProfileRequest, UserService, UserServiceDependencies,
};
pub use token::{CredentialError, TokenService};
