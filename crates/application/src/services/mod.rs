mod group_service;
mod user_service;


pub use group_service::{
    CreateGroupRequest, GroupRef, GroupService, GroupServiceDependencies, JoinGroupRequest,
    JoinOutcome, LeaveGroupRequest, LeaveOutcome, UpdateGroupRequest,
};
pub(crate) use group_service::member_view;
pub use user_service::{
    RegisterUserRequest, UpdateProfileRequest, UserService, UserServiceDependencies,
};
