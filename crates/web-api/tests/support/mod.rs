use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    GroupService, GroupServiceDependencies, Hub, HubServices, HubSettings, MemoryGroupRepository,
    MemoryUserRepository, SystemClock, TokenService, UserService, UserServiceDependencies,
};
use futures_util::{SinkExt, StreamExt};
use infrastructure::JwtTokenService;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use web_api::{router, AppState};

pub const TEST_SECRET: &str = "test-secret-key-with-enough-length";

/// 监听随机端口的完整服务：内存存储 + JWT 令牌
pub struct TestServer {
    pub addr: SocketAddr,
    pub http: reqwest::Client,
    _shutdown: DropGuard,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 注册用户并换取令牌
    pub async fn token_for(&self, user_id: &str) -> String {
        let registered = self
            .http
            .post(self.url("/api/users"))
            .json(&serde_json::json!({ "userId": user_id, "displayName": user_id }))
            .send()
            .await
            .expect("register user");
        assert!(registered.status().is_success());

        let body = self
            .http
            .post(self.url("/api/auth/token"))
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await
            .expect("issue token")
            .json::<Value>()
            .await
            .expect("token json");
        body["token"].as_str().expect("token field").to_owned()
    }

    pub async fn open_socket(&self) -> WsClient {
        let (stream, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket connect");
        WsClient { stream }
    }

    pub async fn health(&self) -> Value {
        self.http
            .get(self.url("/health"))
            .send()
            .await
            .expect("health")
            .json::<Value>()
            .await
            .expect("health json")
    }
}

pub async fn spawn_server() -> TestServer {
    let user_repository = Arc::new(MemoryUserRepository::new());
    let group_repository = Arc::new(MemoryGroupRepository::new());
    let clock = Arc::new(SystemClock);

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        clock: clock.clone(),
    }));
    let group_service = Arc::new(GroupService::new(GroupServiceDependencies {
        group_repository,
        user_repository,
        clock: clock.clone(),
    }));
    let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::with_expiration(
        TEST_SECRET,
        chrono::Duration::hours(1),
    ));

    let shutdown = CancellationToken::new();
    let hub = Hub::spawn(
        HubServices {
            user_service: user_service.clone(),
            group_service: group_service.clone(),
            token_service: token_service.clone(),
            clock,
        },
        HubSettings::default(),
        shutdown.clone(),
    );

    let state = AppState::new(hub, user_service, group_service, token_service);
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
            .ok();
    });

    TestServer {
        addr,
        http: reqwest::Client::new(),
        _shutdown: shutdown.drop_guard(),
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn send(&mut self, frame: Value) {
        self.stream
            .send(TungsteniteMessage::Text(frame.to_string().into()))
            .await
            .expect("send frame");
    }

    /// 下一条服务端 JSON 消息，跳过控制帧
    pub async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for server message")
                .expect("socket closed")
                .expect("websocket error");
            match message {
                TungsteniteMessage::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("server json")
                }
                TungsteniteMessage::Close(_) => panic!("server closed the socket"),
                _ => continue,
            }
        }
    }

    pub async fn recv_type(&mut self, expected: &str) -> Value {
        let message = self.recv().await;
        assert_eq!(message["type"], expected, "unexpected message: {message}");
        message
    }

    /// 等待服务端关闭连接，期间收到的文本消息一并返回
    pub async fn drain_until_closed(&mut self) -> Vec<Value> {
        let mut received = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for close");
            match next {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    received.push(serde_json::from_str(text.as_str()).expect("server json"))
                }
                Some(Ok(TungsteniteMessage::Close(_))) | None | Some(Err(_)) => return received,
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn authenticate(&mut self, token: &str) -> Value {
        self.send(serde_json::json!({
            "type": "authenticate",
            "payload": { "token": token }
        }))
        .await;
        self.recv_type("authenticated").await
    }
}
