//! Shared application state handed to every axum handler.

use llamagate_runtime::Runtime;
use reqwest::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub client: Client,
}

impl AppState {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> anyhow::Result<Self> {
        let client = Client::builder().pool_max_idle_per_host(10).build()?;
        Ok(Self { runtime, client })
    }
}
