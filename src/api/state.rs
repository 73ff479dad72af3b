use std::sync::Arc;
use std::time::Duration;

use crate::config::{DeployConfig, PublicConfig};
use crate::deploy::Deployer;

#[derive(Clone)]
pub struct AppState {
    pub deployer: Deployer,
    pub public_config: Arc<PublicConfig>,
    pub log_poll_interval: Duration,
}

impl AppState {
    pub fn new(deployer: Deployer, config: &DeployConfig) -> Self {
        Self {
            deployer,
            public_config: Arc::new(config.public_view()),
            log_poll_interval: config.server.log_poll_interval(),
        }
    }
}
