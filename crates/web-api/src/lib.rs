//! Web API 层。
//!
//! 提供 Axum 路由：少量 HTTP 管理接口，以及把 WebSocket 连接桥接到连接中心的 `/ws`。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
pub use ws_connection::WebSocketConnection;
