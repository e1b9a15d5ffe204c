use std::sync::Arc;

use application::{GroupService, HubHandle, TokenService, UserService};

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub user_service: Arc<UserService>,
    pub group_service: Arc<GroupService>,
    pub token_service: Arc<dyn TokenService>,
}

impl AppState {
    pub fn new(
        hub: HubHandle,
        user_service: Arc<UserService>,
        group_service: Arc<GroupService>,
        token_service: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            hub,
            user_service,
            group_service,
            token_service,
        }
    }
}
