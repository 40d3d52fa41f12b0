use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

const USER_AGENT: &str = concat!("nano-banano-bot/", env!("CARGO_PKG_VERSION"));

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
});

/// Shared client. Callers that need a longer deadline set it per request.
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
