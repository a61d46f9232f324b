//! Scenario catalog served by the Kiyomi API.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use kiyomi_core::{CatalogError, Scenario, ScenarioStore, Skill};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Deserialize)]
struct SkillsBody {
    skills: Vec<Skill>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct GeneratedBody {
    #[serde(rename = "scenarioData")]
    scenario_data: Scenario,
}

/// Reads skills and scenarios over HTTP, caching the skill list until
/// [`refresh`](Self::refresh).
pub struct HttpScenarioStore {
    client: Client,
    base_url: String,
    cache: RwLock<Option<Arc<Vec<Skill>>>>,
}

impl HttpScenarioStore {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: RwLock::new(None),
        }
    }

    pub async fn refresh(&self) {
        self.cache.write().await.take();
    }

    /// Asks the API to invent a scenario for a free-text description and goal.
    pub async fn generate(&self, description: &str, goal: &str) -> Result<Scenario> {
        let resp = self
            .client
            .post(format!("{}/api/generate-scenario", self.base_url))
            .json(&json!({ "scenario": description, "goal": goal }))
            .send()
            .await
            .context("Failed to reach the scenario generator")?;
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Scenario generation failed: {} - {}", status, error_message(resp).await);
        }
        let body: GeneratedBody = resp
            .json()
            .await
            .context("Failed to parse generated scenario")?;
        Ok(body.scenario_data)
    }
}

async fn error_message(resp: Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text)
}

async fn check(resp: Response) -> Result<Response, CatalogError> {
    match resp.status() {
        status if status.is_success() => Ok(resp),
        StatusCode::NOT_FOUND => Err(CatalogError::NotFound(error_message(resp).await)),
        status => Err(CatalogError::Unavailable(format!(
            "{} - {}",
            status,
            error_message(resp).await
        ))),
    }
}

fn unavailable(err: reqwest::Error) -> CatalogError {
    CatalogError::Unavailable(err.to_string())
}

#[async_trait]
impl ScenarioStore for HttpScenarioStore {
    async fn list_skills(&self) -> Result<Vec<Skill>, CatalogError> {
        if let Some(skills) = self.cache.read().await.as_ref() {
            return Ok(skills.as_ref().clone());
        }

        let resp = self
            .client
            .get(format!("{}/api/scenarios", self.base_url))
            .send()
            .await
            .map_err(unavailable)?;
        let body: SkillsBody = check(resp).await?.json().await.map_err(unavailable)?;
        debug!(skills = body.skills.len(), "Fetched scenario catalog");

        let skills = Arc::new(body.skills);
        *self.cache.write().await = Some(Arc::clone(&skills));
        Ok(skills.as_ref().clone())
    }

    async fn get_scenario(&self, skill: &str, id: &str) -> Result<Scenario, CatalogError> {
        let resp = self
            .client
            .get(format!("{}/api/scenario-detail", self.base_url))
            .query(&[("skill", skill), ("id", id)])
            .send()
            .await
            .map_err(unavailable)?;
        check(resp).await?.json().await.map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every request with the same status line and JSON body.
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_list_skills_reads_catalog() {
        let url = serve(
            "200 OK",
            r#"{"skills":[{"name":"negotiation","scenarios":[{"id":"raise","name":"Ask for a raise","goal":"Get a raise","opening":"Yes?"}]}]}"#,
        )
        .await;
        let store = HttpScenarioStore::new(Client::new(), &url);

        let skills = store.list_skills().await.unwrap();
        assert_eq!(skills[0].name, "negotiation");
        assert_eq!(skills[0].scenarios[0].persona.botname, "Practice Partner");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_catalog_error() {
        let url = serve("404 Not Found", r#"{"message":"Scenario car not found"}"#).await;
        let store = HttpScenarioStore::new(Client::new(), &url);

        match store.get_scenario("negotiation", "car").await {
            Err(CatalogError::NotFound(message)) => assert_eq!(message, "Scenario car not found"),
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert!(matches!(store.list_skills().await, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_generation_unavailable_is_an_error() {
        let url = serve("503 Service Unavailable", r#"{"message":"Scenario generation is not configured"}"#).await;
        let store = HttpScenarioStore::new(Client::new(), &url);

        let err = store.generate("Returning a phone", "Refund").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
