use application::GroupRepository;
use async_trait::async_trait;
use domain::{Group, GroupId, JoinTag, RepositoryError};
use redis::aio::ConnectionManager;

use super::{command_failed, decode, encode, key};

const GROUPS_SET: &str = "relay:groups";
const TAG_INDEX: &str = "relay:group_tags";

pub struct RedisGroupRepository {
    connection: ConnectionManager,
}

impl RedisGroupRepository {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn group_key(id: GroupId) -> String {
        key("group", id)
    }
}

#[async_trait]
impl GroupRepository for RedisGroupRepository {
    async fn add(&self, group: Group) -> Result<Group, RepositoryError> {
        let mut conn = self.connection.clone();
        let tag = group.join_tag.normalized();
        let payload = encode(&group)?;

        // 先占用标签，HSETNX 保证并发创建时只有一个成功
        let reserved: bool = redis::cmd("HSETNX")
            .arg(TAG_INDEX)
            .arg(&tag)
            .arg(group.id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        if !reserved {
            return Err(RepositoryError::Conflict);
        }

        let created: Result<Option<String>, _> = redis::cmd("SET")
            .arg(Self::group_key(group.id))
            .arg(payload)
            .arg("NX")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(Some(_)) => {}
            outcome => {
                // 写入失败时释放已占用的标签
                let _: Result<(), _> = redis::cmd("HDEL")
                    .arg(TAG_INDEX)
                    .arg(&tag)
                    .query_async(&mut conn)
                    .await;
                return match outcome {
                    Err(err) => Err(command_failed(err)),
                    Ok(_) => Err(RepositoryError::Conflict),
                };
            }
        }

        let indexed: Result<(), _> = redis::cmd("SADD")
            .arg(GROUPS_SET)
            .arg(group.id.to_string())
            .query_async(&mut conn)
            .await;
        if let Err(err) = indexed {
            // 未进入群组集合的记录无法被列出，撤销记录与标签
            let _: Result<(), _> = redis::pipe()
                .atomic()
                .del(Self::group_key(group.id))
                .ignore()
                .hdel(TAG_INDEX, &tag)
                .ignore()
                .query_async(&mut conn)
                .await;
            return Err(command_failed(err));
        }
        Ok(group)
    }

    async fn get(&self, id: GroupId) -> Result<Group, RepositoryError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::group_key(id))
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        match raw {
            Some(raw) => decode(&raw),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_by_tag(&self, tag: &str) -> Result<Group, RepositoryError> {
        let mut conn = self.connection.clone();
        let id: Option<String> = redis::cmd("HGET")
            .arg(TAG_INDEX)
            .arg(JoinTag::normalize(tag))
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        let id: GroupId = match id {
            Some(id) => id
                .parse()
                .map_err(|_| RepositoryError::storage(format!("invalid group id in tag index: {id}")))?,
            None => return Err(RepositoryError::NotFound),
        };
        self.get(id).await
    }

    async fn remove(&self, id: GroupId) -> Result<(), RepositoryError> {
        let group = self.get(id).await?;
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(Self::group_key(id))
            .ignore()
            .srem(GROUPS_SET, id.to_string())
            .ignore()
            .hdel(TAG_INDEX, group.join_tag.normalized())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Group>, RepositoryError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(GROUPS_SET)
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| key("group", id)).collect();
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

    async fn save(&self, group: Group) -> Result<Group, RepositoryError> {
        let mut conn = self.connection.clone();
        let payload = encode(&group)?;
        let updated: Option<String> = redis::cmd("SET")
            .arg(Self::group_key(group.id))
            .arg(payload)
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        match updated {
            Some(_) => Ok(group),
            None => Err(RepositoryError::NotFound),
        }
    }
}
