use std::sync::Arc;

use domain::{DomainError, Group, GroupId, JoinTag, RepositoryError, User, UserId};
use tokio::sync::Mutex;

use crate::{
    clock::Clock,
    dto::{GroupDto, MemberDto},
    error::ApplicationError,
    repository::{GroupRepository, UserRepository},
};

/// 按 ID 或加入标签定位群组
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    Id(GroupId),
    Tag(String),
}

#[derive(Debug, Clone)]
pub struct CreateGroupRequest {
    pub name: String,
    pub join_tag: String,
    pub owner_id: UserId,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub group: GroupRef,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub group_id: GroupId,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct UpdateGroupRequest {
    pub group_id: GroupId,
    pub requested_by: UserId,
    pub name: Option<String>,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub group: Group,
    /// 用户此前不是成员
    pub newly_joined: bool,
    /// 加入前群组为空（处于待删除状态）
    pub reactivated: bool,
}

#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub group: Group,
    pub new_owner: Option<UserId>,
    pub emptied: bool,
}

pub struct GroupServiceDependencies {
    pub group_repository: Arc<dyn GroupRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 群组生命周期管理：创建、加入、离开、所有权转移与空群清理。
///
/// 所有写操作都在同一把异步锁内完成，读-改-写之间不会穿插其他写入。
pub struct GroupService {
    deps: GroupServiceDependencies,
    write_lock: Mutex<()>,
}

impl GroupService {
    pub fn new(deps: GroupServiceDependencies) -> Self {
        Self {
            deps,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn create_group(&self, request: CreateGroupRequest) -> Result<Group, ApplicationError> {
        let join_tag = JoinTag::parse(request.join_tag)?;
        let _guard = self.write_lock.lock().await;

        self.require_user(&request.owner_id).await?;

        let group = Group::create(
            GroupId::generate(),
            request.name,
            join_tag.clone(),
            request.owner_id,
            request.profile_picture_url,
            self.deps.clock.now(),
        )?;

        let stored = match self.deps.group_repository.add(group).await {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict) => {
                return Err(DomainError::DuplicateJoinTag {
                    tag: join_tag.as_str().to_owned(),
                }
                .into())
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            group_id = %stored.id,
            join_tag = %stored.join_tag,
            owner_id = ?stored.owner_id,
            "群组已创建"
        );
        Ok(stored)
    }

    pub async fn join_group(&self, request: JoinGroupRequest) -> Result<JoinOutcome, ApplicationError> {
        let _guard = self.write_lock.lock().await;

        let mut group = self.resolve(&request.group).await?;
        self.require_user(&request.user_id).await?;

        let reactivated = group.is_empty();
        let newly_joined = group.add_member(request.user_id.clone(), self.deps.clock.now());
        if newly_joined {
            group = self
                .deps
                .group_repository
                .save(group)
                .await
                .map_err(group_not_found)?;
            tracing::info!(
                group_id = %group.id,
                user_id = %request.user_id,
                reactivated,
                "用户加入群组"
            );
        }

        Ok(JoinOutcome {
            group,
            newly_joined,
            reactivated,
        })
    }

    pub async fn leave_group(&self, request: LeaveGroupRequest) -> Result<LeaveOutcome, ApplicationError> {
        let _guard = self.write_lock.lock().await;

        let mut group = self.load(request.group_id).await?;
        let removal = {
            let mut rng = rand::rng();
            group.remove_member(&request.user_id, &mut rng, self.deps.clock.now())?
        };
        let group = self
            .deps
            .group_repository
            .save(group)
            .await
            .map_err(group_not_found)?;

        tracing::info!(
            group_id = %group.id,
            user_id = %request.user_id,
            new_owner = ?removal.new_owner,
            emptied = removal.emptied,
            "用户离开群组"
        );

        Ok(LeaveOutcome {
            group,
            new_owner: removal.new_owner,
            emptied: removal.emptied,
        })
    }

    /// 更新群组名称或头像，仅限成员操作
    pub async fn update_group_details(
        &self,
        request: UpdateGroupRequest,
    ) -> Result<Group, ApplicationError> {
        let _guard = self.write_lock.lock().await;

        let mut group = self.load(request.group_id).await?;
        if !group.is_member(&request.requested_by) {
            return Err(DomainError::MemberNotFound.into());
        }
        if group.update_details(request.name, request.profile_picture_url, self.deps.clock.now())? {
            group = self
                .deps
                .group_repository
                .save(group)
                .await
                .map_err(group_not_found)?;
        }
        Ok(group)
    }

    /// 按加入标签搜索（大小写不敏感的精确匹配）
    pub async fn find_by_tag(&self, query: &str) -> Result<Vec<Group>, ApplicationError> {
        if query.trim().is_empty() {
            return Err(ApplicationError::validation("tag must not be empty"));
        }
        match self.deps.group_repository.get_by_tag(query).await {
            Ok(group) => Ok(vec![group]),
            Err(RepositoryError::NotFound) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_group(&self, group_id: GroupId) -> Result<Group, ApplicationError> {
        self.load(group_id).await
    }

    /// 用户所属的全部群组，用于认证后恢复在线订阅
    pub async fn groups_for_member(&self, user_id: &UserId) -> Result<Vec<Group>, ApplicationError> {
        let groups = self.deps.group_repository.list().await?;
        Ok(groups
            .into_iter()
            .filter(|group| group.is_member(user_id))
            .collect())
    }

    /// 宽限期到期：仅当群组仍为空时删除并释放标签。返回是否删除。
    pub async fn purge_if_empty(&self, group_id: GroupId) -> Result<bool, ApplicationError> {
        let _guard = self.write_lock.lock().await;

        let group = match self.deps.group_repository.get(group_id).await {
            Ok(group) => group,
            Err(RepositoryError::NotFound) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        if !group.is_empty() {
            return Ok(false);
        }

        match self.deps.group_repository.remove(group_id).await {
            Ok(()) | Err(RepositoryError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        tracing::info!(group_id = %group_id, join_tag = %group.join_tag, "空群组已删除");
        Ok(true)
    }

    /// 所有空群组的 ID，用于启动时恢复清理计时
    pub async fn empty_groups(&self) -> Result<Vec<GroupId>, ApplicationError> {
        let groups = self.deps.group_repository.list().await?;
        Ok(groups
            .into_iter()
            .filter(Group::is_empty)
            .map(|group| group.id)
            .collect())
    }

    /// 组装成员视图；成员记录缺失时以用户 ID 作为显示名
    pub async fn describe(&self, group: &Group) -> Result<GroupDto, ApplicationError> {
        let mut members = Vec::with_capacity(group.member_count());
        for (user_id, joined_at) in &group.members {
            let member = match self.deps.user_repository.get(user_id).await {
                Ok(user) => member_view(&user, *joined_at),
                Err(RepositoryError::NotFound) => MemberDto {
                    user_id: user_id.as_str().to_owned(),
                    display_name: user_id.as_str().to_owned(),
                    profile_picture_url: None,
                    public_key: String::new(),
                    joined_at: *joined_at,
                },
                Err(err) => return Err(err.into()),
            };
            members.push(member);
        }

        Ok(GroupDto {
            id: group.id,
            name: group.name.clone(),
            join_tag: group.join_tag.as_str().to_owned(),
            profile_picture_url: group.profile_picture_url.clone(),
            owner_id: group.owner_id.as_ref().map(|id| id.as_str().to_owned()),
            members,
            created_at: group.created_at,
        })
    }

    async fn resolve(&self, group: &GroupRef) -> Result<Group, ApplicationError> {
        match group {
            GroupRef::Id(id) => self.load(*id).await,
            GroupRef::Tag(tag) => self
                .deps
                .group_repository
                .get_by_tag(tag)
                .await
                .map_err(group_not_found),
        }
    }

    async fn load(&self, group_id: GroupId) -> Result<Group, ApplicationError> {
        self.deps
            .group_repository
            .get(group_id)
            .await
            .map_err(group_not_found)
    }

    async fn require_user(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        match self.deps.user_repository.get(user_id).await {
            Ok(user) => Ok(user),
            Err(RepositoryError::NotFound) => Err(DomainError::UserNotFound.into()),
            Err(err) => Err(err.into()),
        }
    }
}

pub(crate) fn member_view(user: &User, joined_at: domain::Timestamp) -> MemberDto {
    MemberDto {
        user_id: user.id.as_str().to_owned(),
        display_name: user.display_name.clone(),
        profile_picture_url: user.profile_picture_url.clone(),
        public_key: user.public_key.as_str().to_owned(),
        joined_at,
    }
}

fn group_not_found(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::NotFound => DomainError::GroupNotFound.into(),
        other => other.into(),
    }
}
