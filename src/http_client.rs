use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("rd2l_cost_model/", env!("CARGO_PKG_VERSION"));

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Process-wide blocking client shared by the OpenDota and Stratz fetchers.
pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        let timeout = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1);
        Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build http client")
    })
}
