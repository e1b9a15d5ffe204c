use std::collections::BTreeMap;

use rand::Rng;

use crate::errors::DomainError;
use crate::user::non_blank;
use crate::value_objects::{GroupId, JoinTag, Timestamp, UserId};

const MAX_GROUP_NAME_LEN: usize = 60;

/// 群组聚合。
///
/// 不变式：成员集合非空时 `owner_id` 必为其中一员；成员集合为空时没有所有者，
/// 群组进入待删除状态（由上层的清理计时器决定最终删除）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub join_tag: JoinTag,
    pub profile_picture_url: Option<String>,
    pub owner_id: Option<UserId>,
    /// 成员 ID -> 加入时间
    pub members: BTreeMap<UserId, Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 成员离开后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRemoval {
    /// 所有者离开且仍有成员时，新选出的所有者
    pub new_owner: Option<UserId>,
    /// 成员集合是否已变为空
    pub emptied: bool,
}

impl Group {
    /// 创建群组，创建者自动成为第一个成员和所有者。
    pub fn create(
        id: GroupId,
        name: impl Into<String>,
        join_tag: JoinTag,
        creator: UserId,
        profile_picture_url: Option<String>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        let mut members = BTreeMap::new();
        members.insert(creator.clone(), now);
        Ok(Self {
            id,
            name,
            join_tag,
            profile_picture_url: non_blank(profile_picture_url),
            owner_id: Some(creator),
            members,
            created_at: now,
            updated_at: now,
        })
    }

    /// 添加成员，重复添加是无操作。返回是否为新成员。
    ///
    /// 群组为空（待删除）时加入者直接成为所有者。
    pub fn add_member(&mut self, user_id: UserId, now: Timestamp) -> bool {
        if self.members.contains_key(&user_id) {
            return false;
        }
        if self.owner_id.is_none() {
            self.owner_id = Some(user_id.clone());
        }
        self.members.insert(user_id, now);
        self.updated_at = now;
        true
    }

    /// 移除成员。
    ///
    /// 所有者离开且仍有成员时，从剩余成员中均匀随机选出新所有者；
    /// 选择结果不确定，但一定属于剩余成员集合。
    pub fn remove_member<R: Rng + ?Sized>(
        &mut self,
        user_id: &UserId,
        rng: &mut R,
        now: Timestamp,
    ) -> Result<MemberRemoval, DomainError> {
        if self.members.remove(user_id).is_none() {
            return Err(DomainError::MemberNotFound);
        }
        self.updated_at = now;

        if self.members.is_empty() {
            self.owner_id = None;
            return Ok(MemberRemoval {
                new_owner: None,
                emptied: true,
            });
        }

        if self.owner_id.as_ref() != Some(user_id) {
            return Ok(MemberRemoval {
                new_owner: None,
                emptied: false,
            });
        }

        let index = rng.random_range(0..self.members.len());
        let new_owner = self.members.keys().nth(index).cloned();
        self.owner_id = new_owner.clone();
        Ok(MemberRemoval {
            new_owner,
            emptied: false,
        })
    }

    /// 部分更新群组资料：空白字段不会覆盖原值。返回是否有字段被修改。
    pub fn update_details(
        &mut self,
        name: Option<String>,
        profile_picture_url: Option<String>,
        now: Timestamp,
    ) -> Result<bool, DomainError> {
        let mut changed = false;
        if let Some(name) = non_blank(name) {
            self.name = Self::validate_name(name)?;
            changed = true;
        }
        if let Some(url) = non_blank(profile_picture_url) {
            self.profile_picture_url = Some(url);
            changed = true;
        }
        if changed {
            self.updated_at = now;
        }
        Ok(changed)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn is_owner(&self, user_id: &UserId) -> bool {
        self.owner_id.as_ref() == Some(user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("group_name", "cannot be empty"));
        }
        if trimmed.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(DomainError::invalid_argument("group_name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn uid(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn friends() -> Group {
        Group::create(
            GroupId::generate(),
            "Friends",
            JoinTag::parse("abc123").unwrap(),
            uid("u1"),
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn creator_is_sole_member_and_owner() {
        let group = friends();
        assert_eq!(group.member_count(), 1);
        assert!(group.is_owner(&uid("u1")));
        assert!(group.is_member(&uid("u1")));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = Group::create(
            GroupId::generate(),
            "  ",
            JoinTag::parse("t").unwrap(),
            uid("u1"),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));
    }

    #[test]
    fn add_member_is_idempotent() {
        let mut group = friends();
        assert!(group.add_member(uid("u2"), Utc::now()));
        assert!(!group.add_member(uid("u2"), Utc::now()));
        assert!(!group.add_member(uid("u1"), Utc::now()));
        assert_eq!(group.member_count(), 2);
        assert!(group.is_owner(&uid("u1")));
    }

    #[test]
    fn removing_non_member_fails() {
        let mut group = friends();
        let err = group
            .remove_member(&uid("u2"), &mut rand::rng(), Utc::now())
            .unwrap_err();
        assert_eq!(err, DomainError::MemberNotFound);
    }

    #[test]
    fn owner_leaving_transfers_to_a_remaining_member() {
        for seed in 0..32 {
            let mut group = friends();
            group.add_member(uid("u2"), Utc::now());
            group.add_member(uid("u3"), Utc::now());

            let mut rng = StdRng::seed_from_u64(seed);
            let removal = group.remove_member(&uid("u1"), &mut rng, Utc::now()).unwrap();

            let new_owner = removal.new_owner.expect("owner must be reassigned");
            assert!(new_owner == uid("u2") || new_owner == uid("u3"));
            assert!(group.is_member(&new_owner));
            assert_eq!(group.owner_id.as_ref(), Some(&new_owner));
            assert!(!removal.emptied);
        }
    }

    #[test]
    fn non_owner_leaving_keeps_owner() {
        let mut group = friends();
        group.add_member(uid("u2"), Utc::now());
        let removal = group
            .remove_member(&uid("u2"), &mut rand::rng(), Utc::now())
            .unwrap();
        assert_eq!(removal.new_owner, None);
        assert!(group.is_owner(&uid("u1")));
    }

    #[test]
    fn last_member_leaving_empties_group_without_owner() {
        let mut group = friends();
        let removal = group
            .remove_member(&uid("u1"), &mut rand::rng(), Utc::now())
            .unwrap();
        assert!(removal.emptied);
        assert_eq!(removal.new_owner, None);
        assert!(group.is_empty());
        assert_eq!(group.owner_id, None);
    }

    #[test]
    fn joining_empty_group_makes_joiner_owner() {
        let mut group = friends();
        group
            .remove_member(&uid("u1"), &mut rand::rng(), Utc::now())
            .unwrap();
        assert!(group.add_member(uid("u3"), Utc::now()));
        assert!(group.is_owner(&uid("u3")));
        assert_eq!(group.member_count(), 1);
    }

    #[test]
    fn update_details_keeps_values_for_blank_fields() {
        let mut group = friends();
        let changed = group
            .update_details(Some(" ".into()), None, Utc::now())
            .unwrap();
        assert!(!changed);
        assert_eq!(group.name, "Friends");

        let changed = group
            .update_details(None, Some("https://img/g.png".into()), Utc::now())
            .unwrap();
        assert!(changed);
        assert_eq!(group.name, "Friends");
        assert_eq!(group.profile_picture_url.as_deref(), Some("https://img/g.png"));
    }

    #[test]
    fn pending_group_keeps_empty_owner_in_storage_form() {
        let mut group = friends();
        group
            .remove_member(&uid("u1"), &mut rand::rng(), Utc::now())
            .unwrap();
        let json = serde_json::to_string(&group).unwrap();
        let restored: Group = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.owner_id, None);
        assert!(restored.is_empty());
        assert_eq!(restored.join_tag.as_str(), "abc123");
    }
}
