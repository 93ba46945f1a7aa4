//! Outbound collaborators: SMS, email and recording storage.
//!
//! The pipeline only sees the traits; the reqwest clients below are wired in
//! `main` when their credentials are configured.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderBreaker};
use crate::config::{BlobConfig, SendGridConfig, TwilioConfig};
use crate::errors::AppError;

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AppError>;
}

/// A rendered email ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: &OutboundEmail) -> Result<(), AppError>;
}

#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Copy the provider recording at `source_url` into durable storage and
    /// return its permanent URL.
    async fn upload_recording(&self, call_id: &str, source_url: &str)
        -> Result<String, AppError>;
}

fn build_client(timeout: Duration, name: &str) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::ExternalApiError(format!("Failed to create {} client: {}", name, e)))
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string())
}

/// Twilio Messages API client guarded by a circuit breaker.
#[derive(Clone)]
pub struct TwilioSmsSender {
    client: Client,
    config: TwilioConfig,
    breaker: ProviderBreaker,
}

impl TwilioSmsSender {
    pub fn new(config: TwilioConfig, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout, "Twilio")?,
            config,
            breaker: create_provider_circuit_breaker(),
        })
    }

    async fn post_message(&self, to: &str, body: &str) -> Result<(), AppError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("Twilio request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = error_body(response).await;
            return Err(AppError::DeliveryFailed(format!(
                "Twilio returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AppError> {
        match self.breaker.call(self.post_message(to, body)).await {
            Ok(()) => {
                tracing::info!("SMS sent to {}", to);
                Ok(())
            }
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Twilio circuit open, SMS to {} not attempted", to);
                Err(AppError::DeliveryFailed(
                    "Twilio circuit breaker is open".to_string(),
                ))
            }
        }
    }
}

/// SendGrid v3 mail client.
#[derive(Clone)]
pub struct SendGridEmailSender {
    client: Client,
    config: SendGridConfig,
    breaker: ProviderBreaker,
}

impl SendGridEmailSender {
    pub fn new(config: SendGridConfig, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout, "SendGrid")?,
            config,
            breaker: create_provider_circuit_breaker(),
        })
    }

    async fn post_mail(&self, email: &OutboundEmail) -> Result<(), AppError> {
        let url = format!("{}/v3/mail/send", self.config.base_url.trim_end_matches('/'));
        let payload = json!({
            "personalizations": [{"to": [{"email": email.to}]}],
            "from": {"email": self.config.from_email, "name": self.config.from_name},
            "subject": email.subject,
            "content": [
                {"type": "text/plain", "value": email.text},
                {"type": "text/html", "value": email.html}
            ]
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("SendGrid request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = error_body(response).await;
            return Err(AppError::DeliveryFailed(format!(
                "SendGrid returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl EmailSender for SendGridEmailSender {
    async fn send_email(&self, email: &OutboundEmail) -> Result<(), AppError> {
        match self.breaker.call(self.post_mail(email)).await {
            Ok(()) => {
                tracing::info!("Email '{}' sent to {}", email.subject, email.to);
                Ok(())
            }
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::DeliveryFailed(
                "SendGrid circuit breaker is open".to_string(),
            )),
        }
    }
}

/// Copies provider recordings into an Azure Blob container as `{call_id}.mp3`.
#[derive(Clone)]
pub struct AzureBlobUploader {
    client: Client,
    container: Url,
    sas_token: Option<String>,
}

impl AzureBlobUploader {
    pub fn new(config: BlobConfig, timeout: Duration) -> Result<Self, AppError> {
        let container = Url::parse(&config.container_url).map_err(|e| {
            AppError::InternalError(format!("Invalid blob container URL: {}", e))
        })?;

        Ok(Self {
            client: build_client(timeout, "blob storage")?,
            container,
            sas_token: config.sas_token,
        })
    }

    /// Public URL of the blob for `call_id`, without credentials.
    pub fn blob_url(&self, call_id: &str) -> Result<Url, AppError> {
        let mut url = self.container.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::InternalError("Blob container URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&format!("{}.mp3", call_id));
        Ok(url)
    }
}

#[async_trait]
impl BlobUploader for AzureBlobUploader {
    async fn upload_recording(
        &self,
        call_id: &str,
        source_url: &str,
    ) -> Result<String, AppError> {
        let download = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("Recording download failed: {}", e)))?;

        if !download.status().is_success() {
            return Err(AppError::DeliveryFailed(format!(
                "Recording download returned {}",
                download.status()
            )));
        }

        let audio = download
            .bytes()
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("Recording download failed: {}", e)))?;
        tracing::debug!("Downloaded {} bytes of audio for call {}", audio.len(), call_id);

        let public_url = self.blob_url(call_id)?;
        let mut upload_url = public_url.clone();
        upload_url.set_query(self.sas_token.as_deref());

        let response = self
            .client
            .put(upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, "audio/mpeg")
            .body(audio)
            .send()
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("Blob upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = error_body(response).await;
            return Err(AppError::DeliveryFailed(format!(
                "Blob upload returned {}: {}",
                status, error_text
            )));
        }

        tracing::info!("Recording uploaded: {}", public_url);
        Ok(public_url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_url_appends_call_file_and_drops_sas() {
        let uploader = AzureBlobUploader::new(
            BlobConfig {
                container_url: "https://acct.blob.core.windows.net/call-recordings".to_string(),
                sas_token: Some("sv=2024&sig=abc".to_string()),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        let url = uploader.blob_url("call 1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/call-recordings/call%201.mp3"
        );
    }
}
