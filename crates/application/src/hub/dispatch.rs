//! 客户端请求处理

use domain::{DomainError, GroupId, UserId};
use serde_json::Value;

use super::{ConnectionId, Hub};
use crate::{
    dto::{GroupDto, UserDto},
    error::{ApplicationError, ErrorCode},
    protocol::{ClientCommand, ClientEnvelope, ProtocolError, ServerMessage},
    services::{
        member_view, CreateGroupRequest, GroupRef, JoinGroupRequest, LeaveGroupRequest,
        RegisterUserRequest, UpdateGroupRequest, UpdateProfileRequest,
    },
};

impl Hub {
    pub(super) async fn handle_inbound(
        &mut self,
        connection_id: ConnectionId,
        frame: Result<ClientEnvelope, ProtocolError>,
    ) {
        if !self.connections.contains_key(&connection_id) {
            tracing::debug!(connection_id = %connection_id, "忽略已移除连接的消息");
            return;
        }

        let envelope = match frame {
            Ok(envelope) => envelope,
            Err(err) => return self.reject_frame(connection_id, &err),
        };
        let kind = envelope.kind.clone();

        let command = match envelope.into_command() {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::warn!(connection_id = %connection_id, message_type = %kind, "未知消息类型，已丢弃");
                return;
            }
            Err(err) => return self.reject_frame(connection_id, &err),
        };

        let result = match command {
            ClientCommand::Authenticate {
                token,
                display_name,
                public_key,
            } => {
                self.authenticate(connection_id, token, display_name, public_key)
                    .await
            }
            command => match self.user_of(connection_id) {
                Some(user_id) => self.execute(connection_id, user_id, command).await,
                None => Err(ApplicationError::Unauthenticated),
            },
        };

        if let Err(err) = result {
            self.reply_error(connection_id, &err, &kind);
        }
    }

    async fn execute(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        command: ClientCommand,
    ) -> Result<(), ApplicationError> {
        match command {
            ClientCommand::Authenticate { .. } => Ok(()),
            ClientCommand::CreateGroup {
                name,
                join_tag,
                profile_picture_url,
            } => {
                self.create_group(connection_id, user_id, name, join_tag, profile_picture_url)
                    .await
            }
            ClientCommand::JoinGroup { group } => self.join_group(connection_id, user_id, group).await,
            ClientCommand::LeaveGroup { group_id } => {
                self.leave_group(connection_id, user_id, group_id).await
            }
            ClientCommand::SendMessage { group_id, content } => {
                self.send_message(connection_id, user_id, group_id, content)
            }
            ClientCommand::KeyExchangeOffer {
                target_user_id,
                data,
            } => {
                let message = ServerMessage::KeyExchangeOffer {
                    from_user_id: user_id.as_str().to_owned(),
                    data,
                };
                self.relay_or_offline(connection_id, &target_user_id, message);
                Ok(())
            }
            ClientCommand::KeyExchangeAnswer {
                target_user_id,
                data,
            } => {
                let message = ServerMessage::KeyExchangeAnswer {
                    from_user_id: user_id.as_str().to_owned(),
                    data,
                };
                if self.relay_or_offline(connection_id, &target_user_id, message) {
                    self.deliver(
                        connection_id,
                        ServerMessage::KeyExchangeComplete {
                            peer_user_id: target_user_id.as_str().to_owned(),
                        },
                    );
                }
                Ok(())
            }
            ClientCommand::UpdateProfile {
                display_name,
                profile_picture_url,
            } => {
                let user = self
                    .services
                    .user_service
                    .update_profile(
                        &user_id,
                        UpdateProfileRequest {
                            display_name,
                            profile_picture_url,
                        },
                    )
                    .await?;
                self.deliver(
                    connection_id,
                    ServerMessage::ProfileUpdated {
                        user: UserDto::from(&user),
                    },
                );
                Ok(())
            }
            ClientCommand::UpdateGroup {
                group_id,
                name,
                profile_picture_url,
            } => {
                let group = self
                    .services
                    .group_service
                    .update_group_details(UpdateGroupRequest {
                        group_id,
                        requested_by: user_id,
                        name,
                        profile_picture_url,
                    })
                    .await?;
                let dto = self.services.group_service.describe(&group).await?;
                self.broadcast(group.id, ServerMessage::GroupUpdated { group: dto }, None);
                Ok(())
            }
        }
    }

    async fn authenticate(
        &mut self,
        connection_id: ConnectionId,
        token: String,
        display_name: Option<String>,
        public_key: Option<String>,
    ) -> Result<(), ApplicationError> {
        let verified = match self.services.token_service.verify(&token) {
            Ok(user_id) => user_id,
            Err(err) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    kind = err.kind(),
                    "令牌校验失败"
                );
                return Err(err.into());
            }
        };

        let users = &self.services.user_service;
        let user = users
            .register(RegisterUserRequest {
                user_id: verified.as_str().to_owned(),
                display_name,
                public_key,
            })
            .await?;
        let user = users.touch(&user.id).await?;
        let groups = self
            .services
            .group_service
            .groups_for_member(&user.id)
            .await?;

        // 先完成所有可能失败的读取，再改动绑定与订阅
        let mut views: Vec<GroupDto> = Vec::with_capacity(groups.len());
        for group in &groups {
            views.push(self.services.group_service.describe(group).await?);
        }

        self.detach_identity(connection_id);
        if let Some(previous) = self.bindings.get(&user.id).copied() {
            if previous != connection_id {
                self.supersede(previous, &user.id);
            }
        }

        if let Some(entry) = self.connections.get_mut(&connection_id) {
            entry.user_id = Some(user.id.clone());
        }
        self.bindings.insert(user.id.clone(), connection_id);
        for group in &groups {
            self.subscribe(connection_id, group.id);
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user.id,
            groups = groups.len(),
            "用户认证成功"
        );

        self.deliver(
            connection_id,
            ServerMessage::Authenticated {
                user: UserDto::from(&user),
                groups: views,
            },
        );
        Ok(())
    }

    /// 同一用户的旧连接被新连接取代：尽力通知后立即移除
    fn supersede(&mut self, stale: ConnectionId, user_id: &UserId) {
        if let Some(entry) = self.connections.get(&stale) {
            let _ = entry.outbox.try_send(ServerMessage::SessionReplaced {
                reason: "signed in from another connection".to_owned(),
            });
        }
        self.remove_connection(stale);
        tracing::info!(connection_id = %stale, user_id = %user_id, "旧会话已被取代");
    }

    async fn create_group(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        name: String,
        join_tag: String,
        profile_picture_url: Option<String>,
    ) -> Result<(), ApplicationError> {
        // 已过宽限期的空群组先删除，释放其标签
        self.reap_overdue().await;

        let group = self
            .services
            .group_service
            .create_group(CreateGroupRequest {
                name,
                join_tag,
                owner_id: user_id,
                profile_picture_url,
            })
            .await?;
        let dto = self.services.group_service.describe(&group).await?;
        self.subscribe(connection_id, group.id);
        self.deliver(connection_id, ServerMessage::GroupCreated { group: dto });
        Ok(())
    }

    async fn join_group(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        group: GroupRef,
    ) -> Result<(), ApplicationError> {
        // 计时器可能已到期但循环尚未处理，先补做清理
        self.reap_overdue().await;

        let outcome = self
            .services
            .group_service
            .join_group(JoinGroupRequest {
                group,
                user_id: user_id.clone(),
            })
            .await?;
        let group_id = outcome.group.id;

        if self.cleanup.cancel(group_id) {
            tracing::info!(group_id = %group_id, user_id = %user_id, "群组重新激活，取消清理");
        }

        let dto = self.services.group_service.describe(&outcome.group).await?;
        self.subscribe(connection_id, group_id);

        if outcome.newly_joined {
            let joined_at = outcome.group.members.get(&user_id).copied();
            let user = self.services.user_service.get_user(&user_id).await?;
            if let Some(joined_at) = joined_at {
                self.broadcast(
                    group_id,
                    ServerMessage::MemberJoined {
                        group_id,
                        member: member_view(&user, joined_at),
                    },
                    Some(&user_id),
                );
            }
        }

        self.deliver(connection_id, ServerMessage::GroupJoined { group: dto });
        Ok(())
    }

    async fn leave_group(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<(), ApplicationError> {
        let outcome = self
            .services
            .group_service
            .leave_group(LeaveGroupRequest {
                group_id,
                user_id: user_id.clone(),
            })
            .await?;

        self.unsubscribe(connection_id, group_id);
        self.deliver(connection_id, ServerMessage::GroupLeft { group_id });

        self.broadcast(
            group_id,
            ServerMessage::MemberLeft {
                group_id,
                user_id: user_id.as_str().to_owned(),
            },
            Some(&user_id),
        );
        if let Some(new_owner) = &outcome.new_owner {
            self.broadcast(
                group_id,
                ServerMessage::OwnerChanged {
                    group_id,
                    owner_id: new_owner.as_str().to_owned(),
                },
                None,
            );
        }

        if outcome.emptied {
            let deadline = self.cleanup.schedule(
                group_id,
                tokio::time::Instant::now(),
                self.settings.cleanup_grace,
            );
            tracing::info!(
                group_id = %group_id,
                grace_secs = self.settings.cleanup_grace.as_secs(),
                deadline = ?deadline,
                "群组已空，进入待删除状态"
            );
        }
        Ok(())
    }

    fn send_message(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        group_id: GroupId,
        content: Value,
    ) -> Result<(), ApplicationError> {
        let subscribed = self
            .connections
            .get(&connection_id)
            .is_some_and(|entry| entry.groups.contains(&group_id));
        if !subscribed {
            return Err(DomainError::MemberNotFound.into());
        }

        let message = ServerMessage::NewMessage {
            group_id,
            sender_id: user_id.as_str().to_owned(),
            content,
            sent_at: self.services.clock.now(),
        };
        self.broadcast(group_id, message, Some(&user_id));
        Ok(())
    }

    /// 转发给在线目标；目标离线时回复发送方 `user_offline`
    fn relay_or_offline(
        &mut self,
        connection_id: ConnectionId,
        target: &UserId,
        message: ServerMessage,
    ) -> bool {
        if self.relay(target, message) {
            return true;
        }
        tracing::debug!(connection_id = %connection_id, target = %target, "转发目标不在线");
        self.deliver(
            connection_id,
            ServerMessage::UserOffline {
                user_id: target.as_str().to_owned(),
            },
        );
        false
    }

    fn reject_frame(&mut self, connection_id: ConnectionId, err: &ProtocolError) {
        tracing::debug!(connection_id = %connection_id, error = %err, "无法解析的客户端消息");
        self.deliver(
            connection_id,
            ServerMessage::error(ErrorCode::ValidationError, err.to_string(), err.request_type()),
        );
    }

    fn reply_error(&mut self, connection_id: ConnectionId, err: &ApplicationError, kind: &str) {
        let code = err.code();
        if code == ErrorCode::InternalError {
            tracing::error!(connection_id = %connection_id, request_type = kind, error = ?err, "请求处理失败");
        } else {
            tracing::debug!(connection_id = %connection_id, request_type = kind, error = %err, "请求被拒绝");
        }
        self.deliver(
            connection_id,
            ServerMessage::error(code, err.public_message(), Some(kind)),
        );
    }
}
