//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动连接中心与 Axum Web 服务。

use std::sync::Arc;

use application::{
    Clock, GroupRepository, GroupService, GroupServiceDependencies, Hub, HubServices, HubSettings,
    MemoryGroupRepository, MemoryUserRepository, SystemClock, TokenService, UserRepository,
    UserService, UserServiceDependencies,
};
use config::{AppConfig, StorageBackend};
use infrastructure::{JwtTokenService, RedisStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    if config.uses_development_secret() {
        tracing::warn!("正在使用内置的开发 JWT 密钥，请通过 RELAY_JWT__SECRET 设置");
    }

    let (user_repository, group_repository) = repositories(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        clock: clock.clone(),
    }));
    let group_service = Arc::new(GroupService::new(GroupServiceDependencies {
        group_repository,
        user_repository,
        clock: clock.clone(),
    }));
    let token_service: Arc<dyn TokenService> = Arc::new(JwtTokenService::new(&config.jwt));

    let shutdown = CancellationToken::new();
    let hub = Hub::spawn(
        HubServices {
            user_service: user_service.clone(),
            group_service: group_service.clone(),
            token_service: token_service.clone(),
            clock,
        },
        HubSettings::from(&config.hub),
        shutdown.clone(),
    );

    let state = AppState::new(hub, user_service, group_service, token_service);
    let app = router(state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("中继服务器启动在 http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    tracing::info!("服务器已停止");
    Ok(())
}

async fn repositories(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn UserRepository>, Arc<dyn GroupRepository>)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("使用内存存储");
            Ok((
                Arc::new(MemoryUserRepository::new()),
                Arc::new(MemoryGroupRepository::new()),
            ))
        }
        StorageBackend::Redis => {
            tracing::info!("使用 Redis 存储");
            let store = RedisStore::connect(&config.storage.redis_url).await?;
            Ok((
                Arc::new(store.user_repository()),
                Arc::new(store.group_repository()),
            ))
        }
    }
}

/// 等待 Ctrl+C，随后通知连接中心停止
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        shutdown.cancelled().await;
        return;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
    shutdown.cancel();
}
