use async_trait::async_trait;
use domain::{Group, GroupId, RepositoryError, User, UserId};

/// 用户存储。查询不到时返回 `RepositoryError::NotFound`。
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 新增用户，ID 已存在时返回 `Conflict`
    async fn add(&self, user: User) -> Result<User, RepositoryError>;
    async fn get(&self, id: &UserId) -> Result<User, RepositoryError>;
    async fn remove(&self, id: &UserId) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
    /// 覆盖已有用户，不存在时返回 `NotFound`
    async fn save(&self, user: User) -> Result<User, RepositoryError>;
}

/// 群组存储，同时维护加入标签的唯一索引（按小写比较）。
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// 原子地写入群组并占用加入标签；标签已被占用时返回 `Conflict`
    async fn add(&self, group: Group) -> Result<Group, RepositoryError>;
    async fn get(&self, id: GroupId) -> Result<Group, RepositoryError>;
    /// 按加入标签精确查找（大小写不敏感）
    async fn get_by_tag(&self, tag: &str) -> Result<Group, RepositoryError>;
    /// 删除群组并释放其标签
    async fn remove(&self, id: GroupId) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<Group>, RepositoryError>;
    async fn save(&self, group: Group) -> Result<Group, RepositoryError>;
}

/// 内存实现，默认存储后端，也用于测试。
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryUserRepository {
        users: RwLock<HashMap<UserId, User>>,
    }

    impl MemoryUserRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserRepository for MemoryUserRepository {
        async fn add(&self, user: User) -> Result<User, RepositoryError> {
            let mut users = self.users.write().await;
            if users.contains_key(&user.id) {
                return Err(RepositoryError::Conflict);
            }
            users.insert(user.id.clone(), user.clone());
            Ok(user)
        }

        async fn get(&self, id: &UserId) -> Result<User, RepositoryError> {
            let users = self.users.read().await;
            users.get(id).cloned().ok_or(RepositoryError::NotFound)
        }

        async fn remove(&self, id: &UserId) -> Result<(), RepositoryError> {
            let mut users = self.users.write().await;
            users.remove(id).map(|_| ()).ok_or(RepositoryError::NotFound)
        }

        async fn list(&self) -> Result<Vec<User>, RepositoryError> {
            let users = self.users.read().await;
            Ok(users.values().cloned().collect())
        }

        async fn save(&self, user: User) -> Result<User, RepositoryError> {
            let mut users = self.users.write().await;
            match users.get_mut(&user.id) {
                Some(slot) => {
                    *slot = user.clone();
                    Ok(user)
                }
                None => Err(RepositoryError::NotFound),
            }
        }
    }

    #[derive(Default)]
    struct GroupTables {
        groups: HashMap<GroupId, Group>,
        /// 小写标签 -> 群组 ID
        tags: HashMap<String, GroupId>,
    }

    #[derive(Default)]
    pub struct MemoryGroupRepository {
        inner: RwLock<GroupTables>,
    }

    impl MemoryGroupRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl GroupRepository for MemoryGroupRepository {
        async fn add(&self, group: Group) -> Result<Group, RepositoryError> {
            let mut tables = self.inner.write().await;
            let tag = group.join_tag.normalized();
            if tables.groups.contains_key(&group.id) || tables.tags.contains_key(&tag) {
                return Err(RepositoryError::Conflict);
            }
            tables.tags.insert(tag, group.id);
            tables.groups.insert(group.id, group.clone());
            Ok(group)
        }

        async fn get(&self, id: GroupId) -> Result<Group, RepositoryError> {
            let tables = self.inner.read().await;
            tables.groups.get(&id).cloned().ok_or(RepositoryError::NotFound)
        }

        async fn get_by_tag(&self, tag: &str) -> Result<Group, RepositoryError> {
            let tables = self.inner.read().await;
            tables
                .tags
                .get(&domain::JoinTag::normalize(tag))
                .and_then(|id| tables.groups.get(id))
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn remove(&self, id: GroupId) -> Result<(), RepositoryError> {
            let mut tables = self.inner.write().await;
            let group = tables.groups.remove(&id).ok_or(RepositoryError::NotFound)?;
            tables.tags.remove(&group.join_tag.normalized());
            Ok(())
        }

        async fn list(&self) -> Result<Vec<Group>, RepositoryError> {
            let tables = self.inner.read().await;
            Ok(tables.groups.values().cloned().collect())
        }

        async fn save(&self, group: Group) -> Result<Group, RepositoryError> {
            let mut tables = self.inner.write().await;
            match tables.groups.get_mut(&group.id) {
                Some(slot) => {
                    *slot = group.clone();
                    Ok(group)
                }
                None => Err(RepositoryError::NotFound),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::Utc;
        use domain::JoinTag;

        fn group(tag: &str) -> Group {
            Group::create(
                GroupId::generate(),
                "g",
                JoinTag::parse(tag).unwrap(),
                UserId::parse("owner").unwrap(),
                None,
                Utc::now(),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn tag_index_is_case_insensitive_and_unique() {
            let repo = MemoryGroupRepository::new();
            let stored = repo.add(group("AbC")).await.unwrap();

            assert_eq!(repo.get_by_tag("abc").await.unwrap().id, stored.id);
            assert!(matches!(
                repo.add(group("ABC")).await,
                Err(RepositoryError::Conflict)
            ));

            repo.remove(stored.id).await.unwrap();
            assert!(matches!(
                repo.get_by_tag("abc").await,
                Err(RepositoryError::NotFound)
            ));
            repo.add(group("abc")).await.unwrap();
        }

        #[tokio::test]
        async fn save_requires_existing_record() {
            let repo = MemoryGroupRepository::new();
            assert!(matches!(
                repo.save(group("x")).await,
                Err(RepositoryError::NotFound)
            ));
        }
    }
}
