use application::UserRepository;
use async_trait::async_trait;
use domain::{RepositoryError, User, UserId};
use redis::aio::ConnectionManager;

use super::{command_failed, decode, encode, key};

const USERS_SET: &str = "relay:users";

pub struct RedisUserRepository {
    connection: ConnectionManager,
}

impl RedisUserRepository {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn user_key(id: &UserId) -> String {
        key("user", id)
    }
}

#[async_trait]
impl UserRepository for RedisUserRepository {
    async fn add(&self, user: User) -> Result<User, RepositoryError> {
        let mut conn = self.connection.clone();
        let payload = encode(&user)?;

        // SET NX 保证同一 ID 只写入一次
        let created: Option<String> = redis::cmd("SET")
            .arg(Self::user_key(&user.id))
            .arg(payload)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        if created.is_none() {
            return Err(RepositoryError::Conflict);
        }

        let _: () = redis::cmd("SADD")
            .arg(USERS_SET)
            .arg(user.id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(user)
    }

    async fn get(&self, id: &UserId) -> Result<User, RepositoryError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::user_key(id))
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        match raw {
            Some(raw) => decode(&raw),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn remove(&self, id: &UserId) -> Result<(), RepositoryError> {
        let mut conn = self.connection.clone();
        let (deleted, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(Self::user_key(id))
            .srem(USERS_SET, id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(USERS_SET)
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| key("user", id)).collect();
        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;

        records
            .into_iter()
            .flatten()
            .map(|raw| decode(&raw))
            .collect()
    }

    async fn save(&self, user: User) -> Result<User, RepositoryError> {
        let mut conn = self.connection.clone();
        let payload = encode(&user)?;
        let updated: Option<String> = redis::cmd("SET")
            .arg(Self::user_key(&user.id))
            .arg(payload)
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        match updated {
            Some(_) => Ok(user),
            None => Err(RepositoryError::NotFound),
        }
    }
}
