use application::{ClientEnvelope, Connection, ConnectionId, HubHandle, ProtocolError};
use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 连接
///
/// 把一个 socket 桥接到连接中心：
/// - 读取任务按到达顺序解码客户端帧并转交连接中心
/// - 写入任务把出站队列中的消息写回 socket
/// - 出站队列被关闭时主动关闭 socket
pub struct WebSocketConnection {
    socket: WebSocket,
    hub: HubHandle,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, hub: HubHandle) -> Self {
        Self { socket, hub }
    }

    pub async fn run(self) {
        let Self { socket, hub } = self;

        let Connection { id, mut outbox } = match hub.connect().await {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!(error = %err, "连接中心不可用，拒绝 WebSocket 连接");
                return;
            }
        };
        tracing::info!(connection_id = %id, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();

        // 读取任务只通过命令通道触碰 sender
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outbox.recv() => {
                        let Some(message) = message else {
                            // 连接被取代或因发送过慢被移除
                            let _ = sender.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let payload = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize websocket payload");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            tracing::debug!("Failed to send text message");
                            break;
                        }
                    }
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => {
                            if sender.send(WsMessage::Pong(data)).await.is_err() {
                                tracing::debug!("Failed to send pong message");
                                break;
                            }
                        }
                    }
                }
            }
        });

        let recv_hub = hub.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if Self::handle_incoming(&recv_hub, id, message, &cmd_tx)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
            }
            _ = &mut recv_task => {
                send_task.abort();
            }
        }

        if let Err(err) = hub.disconnect(id).await {
            tracing::debug!(connection_id = %id, error = %err, "连接中心已停止，跳过断开通知");
        }
        tracing::info!(connection_id = %id, "WebSocket 连接已断开");
    }

    /// 处理一帧客户端消息；返回 `Err` 表示应结束读取
    async fn handle_incoming(
        hub: &HubHandle,
        connection_id: ConnectionId,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        let frame = match message {
            WsMessage::Close(_) => {
                tracing::debug!(connection_id = %connection_id, "WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                    return Err(());
                }
                return Ok(());
            }
            WsMessage::Pong(_) => return Ok(()),
            WsMessage::Text(text) => ClientEnvelope::decode(text.as_str()),
            WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => ClientEnvelope::decode(text),
                Err(_) => Err(ProtocolError::Malformed {
                    reason: "binary frame is not valid UTF-8".to_owned(),
                }),
            },
        };

        hub.dispatch(connection_id, frame).await.map_err(|err| {
            tracing::warn!(connection_id = %connection_id, error = %err, "连接中心已停止");
        })
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}
