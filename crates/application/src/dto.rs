use domain::{Group, GroupId, Timestamp, User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub display_name: String,
    pub profile_picture_url: Option<String>,
    pub public_key: String,
    pub last_seen: Timestamp,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.as_str().to_owned(),
            display_name: user.display_name.clone(),
            profile_picture_url: user.profile_picture_url.clone(),
            public_key: user.public_key.as_str().to_owned(),
            last_seen: user.last_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub user_id: String,
    pub display_name: String,
    pub profile_picture_url: Option<String>,
    pub public_key: String,
    pub joined_at: Timestamp,
}

/// 群组完整视图，仅发送给成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub id: GroupId,
    pub name: String,
    pub join_tag: String,
    pub profile_picture_url: Option<String>,
    pub owner_id: Option<String>,
    pub members: Vec<MemberDto>,
    pub created_at: Timestamp,
}

/// 群组公开视图（搜索结果），不包含成员列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummaryDto {
    pub id: GroupId,
    pub name: String,
    pub profile_picture_url: Option<String>,
    pub join_tag: String,
    pub member_count: usize,
}

impl From<&Group> for GroupSummaryDto {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id,
            name: group.name.clone(),
            profile_picture_url: group.profile_picture_url.clone(),
            join_tag: group.join_tag.as_str().to_owned(),
            member_count: group.member_count(),
        }
    }
}
