use crate::config::NotifyConfig;
use crate::decision::ChartImage;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Discord-style webhook sender with a trade room and a pipeline room
///
/// Delivery is best effort: failures are logged and never returned.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    alert_url: String,
    notify_url: String,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            alert_url: config.alert_webhook_url.clone(),
            notify_url: config.notify_webhook_url.clone(),
        }
    }

    pub async fn trade_alert(&self, message: &str, image: Option<ChartImage>) {
        self.send(&self.alert_url, format!("**TRADE ALERT**\n{}", message), image)
            .await;
    }

    pub async fn pipeline(&self, message: &str, image: Option<ChartImage>) {
        self.send(&self.notify_url, format!("**Pipeline**\n{}", message), image)
            .await;
    }

    async fn send(&self, url: &str, content: String, image: Option<ChartImage>) {
        if url.is_empty() {
            return;
        }

        if let Some(image) = image {
            match self.send_multipart(url, &content, image).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Webhook image upload failed, sending text only");
                }
            }
        }

        if let Err(e) = self.send_text(url, &content).await {
            tracing::warn!(error = %e, "Webhook delivery failed");
        }
    }

    async fn send_text(&self, url: &str, content: &str) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(&json!({ "content": content }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_multipart(
        &self,
        url: &str,
        content: &str,
        image: ChartImage,
    ) -> Result<(), reqwest::Error> {
        let file = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str("image/png")?;
        let form = Form::new()
            .part("file", file)
            .text("content", content.to_string());

        self.client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
