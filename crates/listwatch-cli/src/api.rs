use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

/// Thin HTTP client over the job server's `/v1` API.
pub struct ApiClient {
    client: Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Submitted {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct JobView {
    pub id: String,
    pub action: String,
    pub status: String,
    pub output: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobList {
    pub jobs: BTreeMap<String, String>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct ActionRow {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ParamRow {
    pub flag: String,
    pub short: Option<String>,
    pub default: Option<String>,
    pub help: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionTable {
    pub actions: Vec<ActionRow>,
    pub params: Vec<ParamRow>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid server URL: {base_url}"))?;
        let client = Client::builder()
            .user_agent(concat!("listwatch-cli/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    pub async fn submit(&self, body: &serde_json::Value) -> Result<Submitted> {
        let request = self.client.post(self.url("v1/jobs")?).json(body);
        self.send(request).await
    }

    pub async fn job(&self, id: &str) -> Result<JobView> {
        let request = self.client.get(self.url(&format!("v1/jobs/{id}"))?);
        self.send(request).await
    }

    pub async fn jobs(&self, status: Option<&str>) -> Result<JobList> {
        let mut url = self.url("v1/jobs")?;
        if let Some(status) = status {
            url.query_pairs_mut().append_pair("status", status);
        }
        self.send(self.client.get(url)).await
    }

    pub async fn actions(&self) -> Result<ActionTable> {
        let request = self.client.get(self.url("v1/actions")?);
        self.send(request).await
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid API path: {path}"))
    }

    async fn send<T: DeserializeOwned>(&self, mut request: RequestBuilder) -> Result<T> {
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .context("Unexpected response from server");
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("{} ({status})", body.message),
        Err(_) => bail!("Server returned {status}: {text}"),
    }
}
