//! Image downloads over HTTP.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use tracing::debug;

use crate::render::{FetchError, ImageFetcher};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Hosts that serve private repository uploads and accept the GitHub token.
const GITHUB_HOSTS: [&str; 3] = ["github.com", "githubusercontent.com", "githubassets.com"];

/// Downloads images with reqwest, sending the GitHub token to GitHub hosts
/// only.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl HttpImageFetcher {
    pub fn new(token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("issue-mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(HttpImageFetcher { client, token })
    }
}

impl std::fmt::Debug for HttpImageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpImageFetcher")
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

/// Whether `url` points at a GitHub-operated host.
fn is_github_host(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };
    let host = rest.split(['/', '?', '#', ':']).next().unwrap_or_default();
    GITHUB_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")))
}

impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let mut request = self.client.get(url);
        if let Some(token) = &self.token
            && is_github_host(url)
        {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(transport)?;
        debug!(url, size = bytes.len(), "Downloaded image");
        Ok(bytes.to_vec())
    }
}
