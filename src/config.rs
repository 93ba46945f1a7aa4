use serde::Deserialize;

/// Twilio credentials. All three must be present for the SMS channel to be enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: String,
    pub base_url: String,
}

/// Destination container for call recordings.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// e.g. `https://account.blob.core.windows.net/call-recordings`
    pub container_url: String,
    /// SAS query string without the leading `?`.
    pub sas_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub twilio: Option<TwilioConfig>,
    pub sendgrid: Option<SendGridConfig>,
    pub blob: Option<BlobConfig>,
    pub notify_timeout_secs: u64,
    pub retry_poll_secs: u64,
    pub retry_batch_limit: i64,
    pub trial_call_limit: i64,
    pub retry_failed_notifications: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            twilio: twilio_from_env()?,
            sendgrid: optional_var("SENDGRID_API_KEY").map(|api_key| SendGridConfig {
                api_key,
                from_email: optional_var("SENDGRID_FROM_EMAIL")
                    .unwrap_or_else(|| "noreply@mindrobo.com".to_string()),
                from_name: optional_var("SENDGRID_FROM_NAME")
                    .unwrap_or_else(|| "MindRobo".to_string()),
                base_url: optional_var("SENDGRID_BASE_URL")
                    .unwrap_or_else(|| "https://api.sendgrid.com".to_string()),
            }),
            blob: match optional_var("BLOB_CONTAINER_URL") {
                Some(url) => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("BLOB_CONTAINER_URL must start with http:// or https://");
                    }
                    Some(BlobConfig {
                        container_url: url.trim_end_matches('/').to_string(),
                        sas_token: optional_var("BLOB_SAS_TOKEN")
                            .map(|t| t.trim_start_matches('?').to_string()),
                    })
                }
                None => None,
            },
            notify_timeout_secs: positive_var("NOTIFY_TIMEOUT_SECS", 10)?,
            retry_poll_secs: positive_var("RETRY_POLL_SECS", 60)?,
            retry_batch_limit: positive_var("RETRY_BATCH_LIMIT", 50)?,
            trial_call_limit: parse_var("TRIAL_CALL_LIMIT", 50)?,
            retry_failed_notifications: parse_var("RETRY_FAILED_NOTIFICATIONS", true)?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        match config.twilio {
            Some(ref twilio) => tracing::info!("SMS channel enabled (from {})", twilio.from_number),
            None => tracing::warn!("Twilio credentials not configured - SMS channel disabled"),
        }
        if config.sendgrid.is_none() {
            tracing::warn!("SENDGRID_API_KEY not configured - email channel disabled");
        }
        if config.blob.is_none() {
            tracing::warn!("BLOB_CONTAINER_URL not configured - recordings will not be transferred");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

/// Like `parse_var`, but zero and negative values are rejected.
fn positive_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = parse_var(name, default)?;
    if value <= T::default() {
        anyhow::bail!("{} must be greater than zero", name);
    }
    Ok(value)
}

fn twilio_from_env() -> anyhow::Result<Option<TwilioConfig>> {
    let sid = optional_var("TWILIO_ACCOUNT_SID");
    let token = optional_var("TWILIO_AUTH_TOKEN");
    let from = optional_var("TWILIO_PHONE_NUMBER");

    match (sid, token, from) {
        (Some(account_sid), Some(auth_token), Some(from_number)) => Ok(Some(TwilioConfig {
            account_sid,
            auth_token,
            from_number,
            base_url: optional_var("TWILIO_BASE_URL")
                .unwrap_or_else(|| "https://api.twilio.com".to_string()),
        })),
        (None, None, None) => Ok(None),
        _ => anyhow::bail!(
            "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_PHONE_NUMBER must be set together"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        std::env::set_var("CALL_PIPELINE_TEST_ZERO_SECS", "0");
        let err = positive_var::<u64>("CALL_PIPELINE_TEST_ZERO_SECS", 60).unwrap_err();
        assert!(err.to_string().contains("CALL_PIPELINE_TEST_ZERO_SECS"));
    }

    #[test]
    fn negative_limit_is_rejected() {
        std::env::set_var("CALL_PIPELINE_TEST_NEGATIVE_LIMIT", "-5");
        assert!(positive_var::<i64>("CALL_PIPELINE_TEST_NEGATIVE_LIMIT", 50).is_err());
    }

    #[test]
    fn unset_positive_var_uses_default() {
        let value = positive_var::<u64>("CALL_PIPELINE_TEST_UNSET_SECS", 10).unwrap();
        assert_eq!(value, 10);
    }

    #[test]
    fn positive_value_is_parsed() {
        std::env::set_var("CALL_PIPELINE_TEST_POLL_SECS", " 15 ");
        assert_eq!(positive_var::<u64>("CALL_PIPELINE_TEST_POLL_SECS", 60).unwrap(), 15);
    }
}
