use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use crate::errors::{ConfigError, FetchError};
use crate::retry::RetryPolicy;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Builds the one HTTP client the whole process shares.
pub fn build_client(user_agent: &str) -> Result<Client, ConfigError> {
    let client = Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    Ok(client)
}

/// A shared client paired with the retry policy of one caller.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, retry: RetryPolicy) -> HttpFetcher {
        HttpFetcher { client, retry }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Sends the request built by `build`, retrying per policy. Any non-2xx
    /// status is an error.
    pub async fn send<F>(&self, label: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = &self.client;
        let build = &build;
        let (_, result) = self
            .retry
            .run(label, |_| async move {
                let response = build(client).send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok(response)
                } else {
                    Err(FetchError::Status(status))
                }
            })
            .await;
        result
    }
}
