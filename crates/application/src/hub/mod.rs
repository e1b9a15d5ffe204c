//! 连接中心
//!
//! 单个 actor 任务独占连接表、用户绑定、群组在线索引和清理计时器，
//! 所有连接事件、客户端请求与计时器到期都在同一个循环里串行处理。
//! 外部只能通过 [`HubHandle`] 发送命令。

mod cleanup;
mod dispatch;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use domain::{GroupId, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    clock::Clock,
    protocol::{ClientEnvelope, ProtocolError, ServerMessage},
    services::{GroupService, UserService},
    token::TokenService,
};

use cleanup::CleanupScheduler;

/// 连接标识，由连接中心分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    /// 命令队列容量
    pub command_capacity: usize,
    /// 每个连接的出站队列容量，写满即视为慢消费者
    pub outbox_capacity: usize,
    /// 空群组删除前的宽限期
    pub cleanup_grace: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            outbox_capacity: 256,
            cleanup_grace: Duration::from_secs(300),
        }
    }
}

impl From<&config::HubConfig> for HubSettings {
    fn from(value: &config::HubConfig) -> Self {
        Self {
            command_capacity: value.command_capacity,
            outbox_capacity: value.outbox_capacity,
            cleanup_grace: Duration::from_secs(value.group_cleanup_grace_secs),
        }
    }
}

pub struct HubServices {
    pub user_service: Arc<UserService>,
    pub group_service: Arc<GroupService>,
    pub token_service: Arc<dyn TokenService>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connections: usize,
    pub authenticated: usize,
    pub online_groups: usize,
    pub pending_cleanups: usize,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

/// 新连接：ID 与出站队列的接收端。出站队列关闭意味着服务端要求断开。
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub outbox: mpsc::Receiver<ServerMessage>,
}

enum HubCommand {
    Register {
        connection_id: ConnectionId,
        outbox: mpsc::Sender<ServerMessage>,
    },
    Inbound {
        connection_id: ConnectionId,
        frame: Result<ClientEnvelope, ProtocolError>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    outbox_capacity: usize,
}

impl HubHandle {
    /// 注册一个未认证的新连接
    pub async fn connect(&self) -> Result<Connection, HubError> {
        let connection_id = ConnectionId::generate();
        let (outbox, receiver) = mpsc::channel(self.outbox_capacity);
        self.send(HubCommand::Register {
            connection_id,
            outbox,
        })
        .await?;
        Ok(Connection {
            id: connection_id,
            outbox: receiver,
        })
    }

    /// 转交一帧已解码（或解码失败）的客户端消息；同一连接的帧按调用顺序处理
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        frame: Result<ClientEnvelope, ProtocolError>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Inbound {
            connection_id,
            frame,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Disconnect { connection_id }).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

struct ConnectionEntry {
    user_id: Option<UserId>,
    /// 此连接订阅的群组（在线索引的反向视图）
    groups: HashSet<GroupId>,
    outbox: mpsc::Sender<ServerMessage>,
}

pub struct Hub {
    services: HubServices,
    settings: HubSettings,
    commands: mpsc::Receiver<HubCommand>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    bindings: HashMap<UserId, ConnectionId>,
    presence: HashMap<GroupId, HashSet<ConnectionId>>,
    cleanup: CleanupScheduler,
}

impl Hub {
    pub fn new(services: HubServices, settings: HubSettings) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(settings.command_capacity);
        let handle = HubHandle {
            commands: tx,
            outbox_capacity: settings.outbox_capacity,
        };
        let hub = Self {
            services,
            settings,
            commands: rx,
            connections: HashMap::new(),
            bindings: HashMap::new(),
            presence: HashMap::new(),
            cleanup: CleanupScheduler::default(),
        };
        (hub, handle)
    }

    /// 创建并在后台运行连接中心
    pub fn spawn(
        services: HubServices,
        settings: HubSettings,
        shutdown: CancellationToken,
    ) -> HubHandle {
        let (hub, handle) = Self::new(services, settings);
        tokio::spawn(hub.run(shutdown));
        handle
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            command_capacity = self.settings.command_capacity,
            outbox_capacity = self.settings.outbox_capacity,
            cleanup_grace_secs = self.settings.cleanup_grace.as_secs(),
            "连接中心已启动"
        );
        self.restore_pending_cleanups().await;

        loop {
            let next_deadline = self.cleanup.next_deadline();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = wait_until(next_deadline) => self.reap_overdue().await,
            }
        }

        tracing::info!(connections = self.connections.len(), "连接中心已停止");
    }

    async fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                connection_id,
                outbox,
            } => {
                self.connections.insert(
                    connection_id,
                    ConnectionEntry {
                        user_id: None,
                        groups: HashSet::new(),
                        outbox,
                    },
                );
                tracing::debug!(connection_id = %connection_id, "新连接已注册");
            }
            HubCommand::Inbound {
                connection_id,
                frame,
            } => self.handle_inbound(connection_id, frame).await,
            HubCommand::Disconnect { connection_id } => self.handle_disconnect(connection_id).await,
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(user_id) = self.remove_connection(connection_id) else {
            tracing::debug!(connection_id = %connection_id, "断开未知或已移除的连接");
            return;
        };
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "用户连接断开");
        if let Err(err) = self.services.user_service.touch(&user_id).await {
            tracing::warn!(user_id = %user_id, error = %err, "更新最后在线时间失败");
        }
    }

    /// 存储中已为空的群组（例如上次停机前待删除的）重新进入宽限期
    async fn restore_pending_cleanups(&mut self) {
        let groups = match self.services.group_service.empty_groups().await {
            Ok(groups) => groups,
            Err(err) => {
                tracing::error!(error = %err, "加载空群组失败，跳过清理恢复");
                return;
            }
        };
        let now = Instant::now();
        for group_id in &groups {
            self.cleanup
                .schedule(*group_id, now, self.settings.cleanup_grace);
        }
        if !groups.is_empty() {
            tracing::info!(groups = groups.len(), "已恢复空群组的清理计时");
        }
    }

    /// 删除所有已到期的空群组。加入与创建请求之前也会调用，保证到期后无法再加入且标签已释放。
    async fn reap_overdue(&mut self) {
        for group_id in self.cleanup.take_due(Instant::now()) {
            match self.services.group_service.purge_if_empty(group_id).await {
                Ok(true) => {
                    self.presence.remove(&group_id);
                    tracing::info!(group_id = %group_id, "宽限期结束，群组已删除");
                }
                Ok(false) => {
                    tracing::debug!(group_id = %group_id, "群组已非空或不存在，跳过清理");
                }
                Err(err) => {
                    tracing::error!(group_id = %group_id, error = %err, "清理群组失败");
                }
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            authenticated: self.bindings.len(),
            online_groups: self.presence.len(),
            pending_cleanups: self.cleanup.len(),
        }
    }

    /// 移除连接及其绑定与在线订阅；丢弃出站队列即通知传输层关闭。
    /// 返回该连接绑定的用户。
    fn remove_connection(&mut self, connection_id: ConnectionId) -> Option<UserId> {
        let entry = self.connections.remove(&connection_id)?;
        for group_id in &entry.groups {
            self.drop_presence(*group_id, connection_id);
        }
        let user_id = entry.user_id?;
        if self.bindings.get(&user_id) == Some(&connection_id) {
            self.bindings.remove(&user_id);
        }
        Some(user_id)
    }

    /// 清除连接当前的身份与全部订阅，连接本身保留
    fn detach_identity(&mut self, connection_id: ConnectionId) {
        let Some(entry) = self.connections.get_mut(&connection_id) else {
            return;
        };
        let groups: Vec<GroupId> = entry.groups.drain().collect();
        let previous = entry.user_id.take();
        for group_id in groups {
            self.drop_presence(group_id, connection_id);
        }
        if let Some(user_id) = previous {
            if self.bindings.get(&user_id) == Some(&connection_id) {
                self.bindings.remove(&user_id);
            }
        }
    }

    fn subscribe(&mut self, connection_id: ConnectionId, group_id: GroupId) {
        if let Some(entry) = self.connections.get_mut(&connection_id) {
            entry.groups.insert(group_id);
            self.presence
                .entry(group_id)
                .or_default()
                .insert(connection_id);
        }
    }

    fn unsubscribe(&mut self, connection_id: ConnectionId, group_id: GroupId) {
        if let Some(entry) = self.connections.get_mut(&connection_id) {
            entry.groups.remove(&group_id);
        }
        self.drop_presence(group_id, connection_id);
    }

    fn drop_presence(&mut self, group_id: GroupId, connection_id: ConnectionId) {
        if let Some(subscribers) = self.presence.get_mut(&group_id) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                self.presence.remove(&group_id);
            }
        }
    }

    fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.connections
            .get(&connection_id)
            .and_then(|entry| entry.user_id.clone())
    }

    /// 非阻塞投递。队列已满或已关闭的连接会被立即驱逐。
    fn deliver(&mut self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        let Some(entry) = self.connections.get(&connection_id) else {
            return false;
        };
        match entry.outbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    user_id = ?entry.user_id,
                    message_type = message.kind(),
                    "出站队列已满，驱逐慢消费者"
                );
                self.remove_connection(connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "出站队列已关闭，移除连接");
                self.remove_connection(connection_id);
                false
            }
        }
    }

    /// 发送给群组内所有在线连接，可排除一个用户。离线成员不会补发。
    fn broadcast(&mut self, group_id: GroupId, message: ServerMessage, exclude: Option<&UserId>) {
        let Some(subscribers) = self.presence.get(&group_id) else {
            return;
        };
        let targets: Vec<ConnectionId> = subscribers
            .iter()
            .copied()
            .filter(|connection_id| match exclude {
                Some(excluded) => {
                    self.connections
                        .get(connection_id)
                        .and_then(|entry| entry.user_id.as_ref())
                        != Some(excluded)
                }
                None => true,
            })
            .collect();

        for connection_id in targets {
            self.deliver(connection_id, message.clone());
        }
    }

    /// 点对点转发给目标用户当前绑定的连接，返回是否送达
    fn relay(&mut self, target: &UserId, message: ServerMessage) -> bool {
        match self.bindings.get(target).copied() {
            Some(connection_id) => self.deliver(connection_id, message),
            None => false,
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
