//! Azure AI Search client
//!
//! Issues one hybrid query per call: the question text for the lexical part
//! and the question embedding as a vector query over the configured vector
//! field. Results keep the service's ranking.

use super::{locator, Candidate, SearchBackend};
use crate::config::SearchConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub struct AzureSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    api_version: String,
    vector_field: String,
    page_field: String,
    title_field: String,
    content_field: String,
    locator_prefix: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    search: &'a str,
    vector_queries: Vec<VectorQuery<'a>>,
    top: usize,
    select: String,
}

#[derive(Serialize)]
struct VectorQuery<'a> {
    kind: &'static str,
    vector: &'a [f32],
    k: usize,
    fields: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    value: Vec<Map<String, Value>>,
}

impl AzureSearch {
    pub fn from_config(config: &SearchConfig, client: reqwest::Client) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value.clone().filter(|v| !v.trim().is_empty()).ok_or_else(|| AppError::Configuration {
                message: format!("search.{} is required for Azure AI Search", name),
            })
        };

        Ok(Self {
            client,
            endpoint: required(&config.endpoint, "endpoint")?.trim_end_matches('/').to_string(),
            api_key: required(&config.api_key, "api_key")?,
            index_name: required(&config.index_name, "index_name")?,
            api_version: config.api_version.clone(),
            vector_field: config.vector_field.clone(),
            page_field: config.page_field.clone(),
            title_field: config.title_field.clone(),
            content_field: config.content_field.clone(),
            locator_prefix: config.locator_prefix.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, self.index_name, self.api_version
        )
    }

    fn request<'a>(&'a self, query: &'a str, vector: &'a [f32], top_k: usize) -> SearchRequest<'a> {
        SearchRequest {
            search: query,
            vector_queries: vec![VectorQuery {
                kind: "vector",
                vector,
                k: top_k,
                fields: &self.vector_field,
            }],
            top: top_k,
            select: format!("{},{},{}", self.page_field, self.title_field, self.content_field),
        }
    }

    fn to_candidate(&self, rank: usize, doc: &Map<String, Value>) -> Result<Candidate> {
        let text = |field: &str| -> Result<String> {
            match doc.get(field) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Null) | None => Err(AppError::SearchError {
                    message: format!("result {} is missing field '{}'", rank, field),
                }),
                Some(other) => Ok(other.to_string()),
            }
        };

        let page = doc.get(&self.page_field).unwrap_or(&Value::Null);

        Ok(Candidate {
            rank,
            title: text(&self.title_field)?,
            body: text(&self.content_field)?,
            locator: locator(&self.locator_prefix, page),
        })
    }

    fn parse(&self, response: SearchResponse) -> Result<Vec<Candidate>> {
        response
            .value
            .iter()
            .enumerate()
            .map(|(rank, doc)| self.to_candidate(rank, doc))
            .collect()
    }
}

#[async_trait]
impl SearchBackend for AzureSearch {
    async fn search(&self, query: &str, vector: &[f32], top_k: usize) -> Result<Vec<Candidate>> {
        let response = self.client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&self.request(query, vector, top_k))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                service: "search".to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| AppError::SearchError {
            message: format!("Failed to parse response: {}", e),
        })?;

        let mut candidates = self.parse(parsed)?;
        candidates.truncate(top_k);

        tracing::debug!(
            index = %self.index_name,
            results = candidates.len(),
            "Azure AI Search query completed"
        );

        Ok(candidates)
    }

    fn name(&self) -> &str {
        "azure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search() -> AzureSearch {
        let config = SearchConfig {
            endpoint: Some("https://demo.search.windows.net/".to_string()),
            api_key: Some("key".to_string()),
            index_name: Some("slides".to_string()),
            ..SearchConfig::default()
        };
        AzureSearch::from_config(&config, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_missing_settings_rejected() {
        let config = SearchConfig::default();
        assert!(AzureSearch::from_config(&config, reqwest::Client::new()).is_err());
    }

    #[test]
    fn test_url() {
        assert_eq!(
            search().url(),
            "https://demo.search.windows.net/indexes/slides/docs/search?api-version=2023-11-01"
        );
    }

    #[test]
    fn test_request_body() {
        let azure = search();
        let vector = [0.5f32, 0.25];
        let body = serde_json::to_value(azure.request("what is rust", &vector, 5)).unwrap();

        assert_eq!(
            body,
            json!({
                "search": "what is rust",
                "vectorQueries": [
                    { "kind": "vector", "vector": [0.5, 0.25], "k": 5, "fields": "contentVector" }
                ],
                "top": 5,
                "select": "page,title,content"
            })
        );
    }

    #[test]
    fn test_parse_response() {
        let response: SearchResponse = serde_json::from_value(json!({
            "value": [
                { "@search.score": 0.03, "page": 4, "title": "Ownership", "content": "Each value has an owner." },
                { "@search.score": 0.02, "page": "7", "title": "Borrowing", "content": "References borrow." }
            ]
        }))
        .unwrap();

        let candidates = search().parse(response).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], Candidate::new(0, "Ownership", "Each value has an owner.", "Slide 4"));
        assert_eq!(candidates[1].rank, 1);
        assert_eq!(candidates[1].locator, "Slide 7");
    }

    #[test]
    fn test_parse_missing_content_is_malformed() {
        let response: SearchResponse = serde_json::from_value(json!({
            "value": [ { "page": 1, "title": "No body" } ]
        }))
        .unwrap();

        let err = search().parse(response).unwrap_err();
        assert!(matches!(err, AppError::SearchError { .. }));
    }
}
