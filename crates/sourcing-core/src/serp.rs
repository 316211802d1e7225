//! SERP provider interface
//!
//! Discovery consumes a search provider that returns profile summaries for
//! a query. The concrete client (and its fallback chain) lives outside this
//! crate; the runner only needs the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// One profile as captured from a search result page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub profile_url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub name: Option<String>,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub provider_meta: Option<serde_json::Value>,
}

/// A provider response for one query.
#[derive(Debug, Clone)]
pub struct SerpSearch {
    pub results: Vec<ProfileSummary>,
    pub provider_used: String,
    pub used_fallback: bool,
}

#[async_trait]
pub trait SerpProvider: Send + Sync {
    /// Search the platform for profiles matching the query.
    async fn search_profiles(&self, query: &str, limit: usize) -> Result<SerpSearch>;
}

/// Extract the stable profile handle from a profile URL.
///
/// `https://www.linkedin.com/in/priya-sharma-1a2b/` -> `priya-sharma-1a2b`
pub fn extract_profile_handle(profile_url: &str) -> Option<String> {
    let lowered = profile_url.trim().to_lowercase();
    let marker = "linkedin.com/in/";
    let start = lowered.find(marker)? + marker.len();
    let rest = &lowered[start..];
    let handle: String = rest
        .chars()
        .take_while(|c| *c != '/' && *c != '?' && *c != '#')
        .collect();
    let handle = handle.trim().to_string();
    if handle.is_empty() {
        None
    } else {
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_profile_handle() {
        assert_eq!(
            extract_profile_handle("https://www.linkedin.com/in/priya-sharma-1a2b/").as_deref(),
            Some("priya-sharma-1a2b")
        );
        assert_eq!(
            extract_profile_handle("http://linkedin.com/in/arjun?trk=search").as_deref(),
            Some("arjun")
        );
        assert_eq!(
            extract_profile_handle("https://in.linkedin.com/in/Meera-Rao").as_deref(),
            Some("meera-rao")
        );
        assert_eq!(extract_profile_handle("https://example.com/profile/1"), None);
        assert_eq!(extract_profile_handle("https://linkedin.com/in/"), None);
    }
}
