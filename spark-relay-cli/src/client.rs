use anyhow::Result;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use spark_relay_core::stream::ContentPayload;
use spark_relay_core::{ConversationTurn, RelayEvent};
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/SparkAPI";

/// Client for a running spark-relay gateway
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ask a question and forward the streamed events until a terminal one arrives.
    pub async fn chat(&self, question: &str, event_tx: mpsc::UnboundedSender<RelayEvent>) -> Result<()> {
        let url = format!("{}/chatStream", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("question", question)])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }

        let mut stream = response.bytes_stream().eventsource();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    let _ = event_tx.send(RelayEvent::error(e.to_string()));
                    break;
                }
            };
            let relay_event = match event.event.as_str() {
                "message" => match serde_json::from_str::<ContentPayload>(&event.data) {
                    Ok(payload) => RelayEvent::message(payload.content),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed message event: {}", e);
                        continue;
                    }
                },
                "complete" => RelayEvent::Complete,
                "error" => RelayEvent::error(event.data),
                _ => continue,
            };

            let terminal = relay_event.is_terminal();
            let _ = event_tx.send(relay_event);
            if terminal {
                break;
            }
        }
        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<ConversationTurn>> {
        let url = format!("{}/getHistory", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }
        Ok(response.json().await?)
    }

    pub async fn clear_history(&self) -> Result<()> {
        let url = format!("{}/delHistory", self.base_url);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }
        Ok(())
    }
}
