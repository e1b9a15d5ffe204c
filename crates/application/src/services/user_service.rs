use std::sync::Arc;

use domain::{DomainError, PublicKey, RepositoryError, User, UserId};

use crate::{clock::Clock, error::ApplicationError, repository::UserRepository};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub user_id: String,
    pub display_name: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub profile_picture_url: Option<String>,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    /// 注册用户。已存在时直接返回现有记录。
    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let user_id = UserId::parse(request.user_id)?;

        match self.deps.user_repository.get(&user_id).await {
            Ok(existing) => return Ok(existing),
            Err(RepositoryError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let user = User::register(
            user_id.clone(),
            request.display_name,
            PublicKey::new(request.public_key.unwrap_or_default()),
            self.deps.clock.now(),
        )?;

        match self.deps.user_repository.add(user).await {
            Ok(stored) => {
                tracing::info!(user_id = %stored.id, "用户已注册");
                Ok(stored)
            }
            // 并发注册：以先写入者为准
            Err(RepositoryError::Conflict) => self.get_user(&user_id).await,
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_user(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .get(user_id)
            .await
            .map_err(user_not_found)
    }

    pub async fn unregister(&self, user_id: &UserId) -> Result<(), ApplicationError> {
        self.deps
            .user_repository
            .remove(user_id)
            .await
            .map_err(user_not_found)?;
        tracing::info!(user_id = %user_id, "用户已注销");
        Ok(())
    }

    pub async fn update_profile(
        &self,
        user_id: &UserId,
        request: UpdateProfileRequest,
    ) -> Result<User, ApplicationError> {
        let mut user = self.get_user(user_id).await?;
        user.update_profile(
            request.display_name,
            request.profile_picture_url,
            self.deps.clock.now(),
        )?;
        let saved = self
            .deps
            .user_repository
            .save(user)
            .await
            .map_err(user_not_found)?;
        Ok(saved)
    }

    /// 更新最后在线时间
    pub async fn touch(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        let mut user = self.get_user(user_id).await?;
        user.touch(self.deps.clock.now());
        self.deps
            .user_repository
            .save(user)
            .await
            .map_err(user_not_found)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ApplicationError> {
        Ok(self.deps.user_repository.list().await?)
    }
}

fn user_not_found(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::NotFound => DomainError::UserNotFound.into(),
        other => other.into(),
    }
}
