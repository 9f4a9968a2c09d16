//! HTTP client for the external push notifier. Fire-and-forget from the
//! dispatcher's point of view: failures are logged, never escalated.

use anyhow::Result;

use parley_types::api::PushNotification;

#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    base_url: String,
}

impl PushClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn notify(&self, note: &PushNotification) -> Result<()> {
        let url = format!("{}/notify", self.base_url);
        self.http
            .post(&url)
            .json(note)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
