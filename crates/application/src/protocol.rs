//! 客户端协议
//!
//! 入站与出站帧都是 `{"type": ..., "payload": {...}}` 形式的 JSON，载荷字段使用 camelCase。

use domain::{GroupId, Timestamp, UserId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    dto::{GroupDto, MemberDto, UserDto},
    error::ErrorCode,
    services::GroupRef,
};

/// 入站信封，载荷在识别类型后再解析
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },
    #[error("invalid payload for {request_type}: {reason}")]
    InvalidPayload {
        request_type: String,
        reason: String,
    },
}

impl ProtocolError {
    pub fn request_type(&self) -> Option<&str> {
        match self {
            ProtocolError::Malformed { .. } => None,
            ProtocolError::InvalidPayload { request_type, .. } => Some(request_type),
        }
    }
}

/// 已识别的客户端请求
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Authenticate {
        token: String,
        display_name: Option<String>,
        public_key: Option<String>,
    },
    CreateGroup {
        name: String,
        join_tag: String,
        profile_picture_url: Option<String>,
    },
    JoinGroup {
        group: GroupRef,
    },
    LeaveGroup {
        group_id: GroupId,
    },
    SendMessage {
        group_id: GroupId,
        content: Value,
    },
    KeyExchangeOffer {
        target_user_id: UserId,
        data: Value,
    },
    KeyExchangeAnswer {
        target_user_id: UserId,
        data: Value,
    },
    UpdateProfile {
        display_name: Option<String>,
        profile_picture_url: Option<String>,
    },
    UpdateGroup {
        group_id: GroupId,
        name: Option<String>,
        profile_picture_url: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticatePayload {
    token: String,
    display_name: Option<String>,
    public_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupPayload {
    name: String,
    join_tag: String,
    profile_picture_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinGroupPayload {
    group_id: Option<GroupId>,
    join_tag: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupIdPayload {
    group_id: GroupId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    group_id: GroupId,
    content: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyExchangePayload {
    target_user_id: UserId,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfilePayload {
    display_name: Option<String>,
    profile_picture_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateGroupPayload {
    group_id: GroupId,
    name: Option<String>,
    profile_picture_url: Option<String>,
}

impl ClientEnvelope {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|err| ProtocolError::Malformed {
            reason: err.to_string(),
        })
    }

    /// 解析载荷。未知类型返回 `Ok(None)`，由调用方记录后丢弃。
    pub fn into_command(self) -> Result<Option<ClientCommand>, ProtocolError> {
        let kind = self.kind.as_str();
        let command = match kind {
            "authenticate" => {
                let p: AuthenticatePayload = parse(kind, self.payload)?;
                ClientCommand::Authenticate {
                    token: p.token,
                    display_name: p.display_name,
                    public_key: p.public_key,
                }
            }
            "create_group" => {
                let p: CreateGroupPayload = parse(kind, self.payload)?;
                ClientCommand::CreateGroup {
                    name: p.name,
                    join_tag: p.join_tag,
                    profile_picture_url: p.profile_picture_url,
                }
            }
            "join_group" => {
                let p: JoinGroupPayload = parse(kind, self.payload)?;
                let group = match (p.group_id, p.join_tag) {
                    (Some(id), _) => GroupRef::Id(id),
                    (None, Some(tag)) if !tag.trim().is_empty() => GroupRef::Tag(tag),
                    _ => {
                        return Err(ProtocolError::InvalidPayload {
                            request_type: kind.to_owned(),
                            reason: "either groupId or joinTag is required".to_owned(),
                        })
                    }
                };
                ClientCommand::JoinGroup { group }
            }
            "leave_group" => {
                let p: GroupIdPayload = parse(kind, self.payload)?;
                ClientCommand::LeaveGroup {
                    group_id: p.group_id,
                }
            }
            "send_message" => {
                let p: SendMessagePayload = parse(kind, self.payload)?;
                ClientCommand::SendMessage {
                    group_id: p.group_id,
                    content: p.content,
                }
            }
            "key_exchange_offer" => {
                let p: KeyExchangePayload = parse(kind, self.payload)?;
                ClientCommand::KeyExchangeOffer {
                    target_user_id: p.target_user_id,
                    data: p.data,
                }
            }
            "key_exchange_answer" => {
                let p: KeyExchangePayload = parse(kind, self.payload)?;
                ClientCommand::KeyExchangeAnswer {
                    target_user_id: p.target_user_id,
                    data: p.data,
                }
            }
            "update_profile" => {
                let p: UpdateProfilePayload = parse(kind, self.payload)?;
                ClientCommand::UpdateProfile {
                    display_name: p.display_name,
                    profile_picture_url: p.profile_picture_url,
                }
            }
            "update_group" => {
                let p: UpdateGroupPayload = parse(kind, self.payload)?;
                ClientCommand::UpdateGroup {
                    group_id: p.group_id,
                    name: p.name,
                    profile_picture_url: p.profile_picture_url,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn parse<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|err| ProtocolError::InvalidPayload {
        request_type: kind.to_owned(),
        reason: err.to_string(),
    })
}

/// 出站消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Authenticated {
        user: UserDto,
        groups: Vec<GroupDto>,
    },
    SessionReplaced {
        reason: String,
    },
    GroupCreated {
        group: GroupDto,
    },
    GroupJoined {
        group: GroupDto,
    },
    MemberJoined {
        group_id: GroupId,
        member: MemberDto,
    },
    GroupLeft {
        group_id: GroupId,
    },
    MemberLeft {
        group_id: GroupId,
        user_id: String,
    },
    OwnerChanged {
        group_id: GroupId,
        owner_id: String,
    },
    NewMessage {
        group_id: GroupId,
        sender_id: String,
        content: Value,
        sent_at: Timestamp,
    },
    KeyExchangeOffer {
        from_user_id: String,
        data: Value,
    },
    KeyExchangeAnswer {
        from_user_id: String,
        data: Value,
    },
    KeyExchangeComplete {
        peer_user_id: String,
    },
    UserOffline {
        user_id: String,
    },
    ProfileUpdated {
        user: UserDto,
    },
    GroupUpdated {
        group: GroupDto,
    },
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        request_type: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>, request_type: Option<&str>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
            request_type: request_type.map(str::to_owned),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Authenticated { .. } => "authenticated",
            ServerMessage::SessionReplaced { .. } => "session_replaced",
            ServerMessage::GroupCreated { .. } => "group_created",
            ServerMessage::GroupJoined { .. } => "group_joined",
            ServerMessage::MemberJoined { .. } => "member_joined",
            ServerMessage::GroupLeft { .. } => "group_left",
            ServerMessage::MemberLeft { .. } => "member_left",
            ServerMessage::OwnerChanged { .. } => "owner_changed",
            ServerMessage::NewMessage { .. } => "new_message",
            ServerMessage::KeyExchangeOffer { .. } => "key_exchange_offer",
            ServerMessage::KeyExchangeAnswer { .. } => "key_exchange_answer",
            ServerMessage::KeyExchangeComplete { .. } => "key_exchange_complete",
            ServerMessage::UserOffline { .. } => "user_offline",
            ServerMessage::ProfileUpdated { .. } => "profile_updated",
            ServerMessage::GroupUpdated { .. } => "group_updated",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> ClientEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn join_group_accepts_tag_or_id() {
        let cmd = envelope(json!({"type": "join_group", "payload": {"joinTag": "ABC123"}}))
            .into_command()
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::JoinGroup {
                group: GroupRef::Tag("ABC123".into())
            }
        );

        let id = GroupId::generate();
        let cmd = envelope(json!({"type": "join_group", "payload": {"groupId": id.to_string()}}))
            .into_command()
            .unwrap()
            .unwrap();
        assert_eq!(cmd, ClientCommand::JoinGroup { group: GroupRef::Id(id) });

        let err = envelope(json!({"type": "join_group", "payload": {}}))
            .into_command()
            .unwrap_err();
        assert_eq!(err.request_type(), Some("join_group"));
    }

    #[test]
    fn blank_target_user_is_an_invalid_payload() {
        let err = envelope(json!({
            "type": "key_exchange_offer",
            "payload": {"targetUserId": "   ", "data": {"k": 1}}
        }))
        .into_command()
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
        assert_eq!(err.request_type(), Some("key_exchange_offer"));

        let cmd = envelope(json!({
            "type": "key_exchange_answer",
            "payload": {"targetUserId": " u2 "}
        }))
        .into_command()
        .unwrap()
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::KeyExchangeAnswer {
                target_user_id: UserId::parse("u2").unwrap(),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let result = envelope(json!({"type": "dance", "payload": {"x": 1}})).into_command();
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn wrong_payload_shape_reports_request_type() {
        let err = envelope(json!({"type": "send_message", "payload": {"groupId": "nope"}}))
            .into_command()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
        assert_eq!(err.request_type(), Some("send_message"));

        assert!(ClientEnvelope::decode("{not json").is_err());
    }

    #[test]
    fn outbound_frames_use_type_and_camel_case_payload() {
        let msg = ServerMessage::KeyExchangeOffer {
            from_user_id: "u1".into(),
            data: json!({"k": "v"}),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "key_exchange_offer", "payload": {"fromUserId": "u1", "data": {"k": "v"}}})
        );

        let err = ServerMessage::error(ErrorCode::Unauthenticated, "authentication required", None);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "error", "payload": {"code": "UNAUTHENTICATED", "message": "authentication required"}})
        );
    }
}
