//! Redis 仓储集成测试
//!
//! 需要本地 Redis：`RELAY_TEST_REDIS_URL`，默认 `redis://127.0.0.1:6379`。

use application::{GroupRepository, UserRepository};
use chrono::Utc;
use domain::{Group, GroupId, JoinTag, PublicKey, RepositoryError, User, UserId};
use infrastructure::RedisStore;

async fn store() -> RedisStore {
    let url = std::env::var("RELAY_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisStore::connect(&url).await.expect("redis must be reachable")
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires redis"]
async fn user_lifecycle() {
    let repo = store().await.user_repository();
    let id = UserId::parse(unique("user")).unwrap();
    let user = User::register(id.clone(), Some("Alice".into()), PublicKey::new("pk"), Utc::now())
        .unwrap();

    repo.add(user.clone()).await.unwrap();
    assert!(matches!(
        repo.add(user.clone()).await,
        Err(RepositoryError::Conflict)
    ));

    let mut loaded = repo.get(&id).await.unwrap();
    assert_eq!(loaded.display_name, "Alice");

    loaded.touch(Utc::now());
    repo.save(loaded).await.unwrap();
    assert!(repo.list().await.unwrap().iter().any(|u| u.id == id));

    repo.remove(&id).await.unwrap();
    assert!(matches!(repo.get(&id).await, Err(RepositoryError::NotFound)));
    assert!(matches!(repo.remove(&id).await, Err(RepositoryError::NotFound)));
}

#[tokio::test]
#[ignore = "requires redis"]
async fn group_tag_index_is_unique_and_released_on_remove() {
    let repo = store().await.group_repository();
    let tag = unique("Tag");
    let owner = UserId::parse("owner").unwrap();
    let group = Group::create(
        GroupId::generate(),
        "Friends",
        JoinTag::parse(tag.clone()).unwrap(),
        owner.clone(),
        None,
        Utc::now(),
    )
    .unwrap();
    repo.add(group.clone()).await.unwrap();

    let found = repo.get_by_tag(&tag.to_uppercase()).await.unwrap();
    assert_eq!(found.id, group.id);

    let clash = Group::create(
        GroupId::generate(),
        "Clash",
        JoinTag::parse(tag.to_lowercase()).unwrap(),
        owner,
        None,
        Utc::now(),
    )
    .unwrap();
    assert!(matches!(
        repo.add(clash.clone()).await,
        Err(RepositoryError::Conflict)
    ));
    assert!(matches!(
        repo.get(clash.id).await,
        Err(RepositoryError::NotFound)
    ));

    repo.remove(group.id).await.unwrap();
    assert!(matches!(
        repo.get_by_tag(&tag).await,
        Err(RepositoryError::NotFound)
    ));
    repo.add(clash.clone()).await.unwrap();
    repo.remove(clash.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires redis"]
async fn added_group_is_listed_and_clash_leaves_no_record() {
    let repo = store().await.group_repository();
    let tag = unique("listed");
    let owner = UserId::parse("owner").unwrap();
    let group = Group::create(
        GroupId::generate(),
        "Listed",
        JoinTag::parse(tag.clone()).unwrap(),
        owner.clone(),
        None,
        Utc::now(),
    )
    .unwrap();
    repo.add(group.clone()).await.unwrap();
    assert!(repo.list().await.unwrap().iter().any(|g| g.id == group.id));

    let clash = Group::create(
        GroupId::generate(),
        "Clash",
        JoinTag::parse(tag.clone()).unwrap(),
        owner,
        None,
        Utc::now(),
    )
    .unwrap();
    assert!(repo.add(clash.clone()).await.is_err());
    let listed = repo.list().await.unwrap();
    assert!(!listed.iter().any(|g| g.id == clash.id));
    assert_eq!(repo.get_by_tag(&tag).await.unwrap().id, group.id);

    repo.remove(group.id).await.unwrap();
}
