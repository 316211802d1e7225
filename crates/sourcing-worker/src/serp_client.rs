//! Serper.dev SERP client
//!
//! Thin HTTP client for the search provider. Results are filtered to
//! profile links before they reach the discovery runner.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use sourcing_core::errors::{Result, SourcingError};
use sourcing_core::serp::{ProfileSummary, SerpProvider, SerpSearch};

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";
const PROVIDER_NAME: &str = "serper";

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

pub struct SerperProvider {
    client: reqwest::Client,
    api_key: String,
}

impl SerperProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| SourcingError::Serp(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    fn to_summaries(response: SerperResponse, limit: usize) -> Vec<ProfileSummary> {
        response
            .organic
            .into_iter()
            .filter(|r| r.link.to_lowercase().contains("linkedin.com/in/"))
            .take(limit)
            .map(|r| ProfileSummary {
                profile_url: r.link,
                title: r.title.clone(),
                snippet: r.snippet,
                name: None,
                headline: r.title,
                location: None,
                provider_meta: None,
            })
            .collect()
    }
}

#[async_trait]
impl SerpProvider for SerperProvider {
    async fn search_profiles(&self, query: &str, limit: usize) -> Result<SerpSearch> {
        let response = self
            .client
            .post(SERPER_ENDPOINT)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({"q": query, "num": limit.min(20)}))
            .send()
            .await
            .map_err(|e| SourcingError::Serp(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourcingError::Serp(format!(
                "serper returned HTTP {}",
                response.status()
            )));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| SourcingError::Serp(format!("bad serper response: {e}")))?;

        Ok(SerpSearch {
            results: Self::to_summaries(parsed, limit),
            provider_used: PROVIDER_NAME.to_string(),
            used_fallback: false,
        })
    }
}
