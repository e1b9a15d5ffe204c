use crate::errors::DomainError;
use crate::value_objects::{PublicKey, Timestamp, UserId};

const MAX_DISPLAY_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub profile_picture_url: Option<String>,
    pub public_key: PublicKey,
    pub last_seen: Timestamp,
    pub created_at: Timestamp,
}

impl User {
    /// 注册新用户；显示名为空时退化为用户 ID。
    pub fn register(
        id: UserId,
        display_name: Option<String>,
        public_key: PublicKey,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let display_name = match non_blank(display_name) {
            Some(name) => validate_display_name(name)?,
            None => id.as_str().to_owned(),
        };
        Ok(Self {
            id,
            display_name,
            profile_picture_url: None,
            public_key,
            last_seen: now,
            created_at: now,
        })
    }

    /// 部分更新资料：空值或空白字段保持原值不变。
    pub fn update_profile(
        &mut self,
        display_name: Option<String>,
        profile_picture_url: Option<String>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        if let Some(name) = non_blank(display_name) {
            self.display_name = validate_display_name(name)?;
        }
        if let Some(url) = non_blank(profile_picture_url) {
            self.profile_picture_url = Some(url);
        }
        self.last_seen = now;
        Ok(())
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_seen = now;
    }
}

fn validate_display_name(name: String) -> Result<String, DomainError> {
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(DomainError::invalid_argument("display_name", "too long"));
    }
    Ok(name)
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user() -> User {
        User::register(
            UserId::parse("u1").unwrap(),
            Some("Alice".into()),
            PublicKey::new("pk"),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn blank_display_name_falls_back_to_id() {
        let user = User::register(
            UserId::parse("u9").unwrap(),
            Some("   ".into()),
            PublicKey::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(user.display_name, "u9");
    }

    #[test]
    fn update_profile_ignores_blank_fields() {
        let mut user = user();
        user.update_profile(Some("".into()), Some("https://img/a.png".into()), Utc::now())
            .unwrap();
        assert_eq!(user.display_name, "Alice");
        assert_eq!(user.profile_picture_url.as_deref(), Some("https://img/a.png"));

        user.update_profile(Some("Alicia".into()), None, Utc::now())
            .unwrap();
        assert_eq!(user.display_name, "Alicia");
        assert_eq!(user.profile_picture_url.as_deref(), Some("https://img/a.png"));
    }

    #[test]
    fn overlong_display_name_is_rejected() {
        let mut user = user();
        let err = user
            .update_profile(Some("n".repeat(65)), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument { .. }));
    }
}
