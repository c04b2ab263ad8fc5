use serde::Deserialize;
use serde_json::json;

use crate::error::Error;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<NewsItem>,
}

/// Searches for news relevant to the user's industry and topics. News is
/// optional color for the briefing, so a missing key or a vendor error
/// degrades to an empty list instead of failing the caller.
pub async fn fetch_relevant_news(query: &str) -> Result<Vec<NewsItem>, Error> {
    let api_key = match std::env::var("TAVILY_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => {
            tracing::warn!("TAVILY_API_KEY missing, skipping news fetch");
            return Ok(Vec::new());
        }
    };

    let response = reqwest::Client::new()
        .post(TAVILY_URL)
        .json(&json!({
            "api_key": api_key,
            "query": format!("noticias recientes e interesantes sobre: {}", query),
            "search_depth": "basic",
            "include_images": false,
            "include_answer": false,
            "max_results": MAX_RESULTS,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Tavily API error ({}): {}", status, body);
        return Ok(Vec::new());
    }

    let data: SearchResponse = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("Malformed Tavily response: {}", e)))?;
    Ok(data.results)
}
