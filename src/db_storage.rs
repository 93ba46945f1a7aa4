use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    ApprovalStatus, Business, Call, CallStatus, InsertOutcome, Lead, LeadFields, LeadSource,
    LeadStatus, NewCall, NewLead, RetryStatus, WebhookRetryEntry,
};
use crate::storage::{BusinessDirectory, CallStorage, RetryStorage};

const CALL_COLUMNS: &str = "id, call_id, caller_phone, business_ref, status, outcome, \
     approval_status, transcript, summary, lead_name, lead_address, service_type, urgency, \
     recording_url, transcript_url, created_at, updated_at";

const LEAD_COLUMNS: &str =
    "id, business_id, call_id, caller_name, caller_phone, service_needed, notes, source, status, created_at";

const RETRY_COLUMNS: &str =
    "id, service, payload, attempts, last_error, status, created_at, updated_at";

const BUSINESS_COLUMNS: &str =
    "id, name, owner_name, owner_phone, owner_email, agent_id, requires_approval, is_trial";

/// Postgres-backed storage for calls, leads, the retry queue and business lookups.
///
/// Business rows change rarely, so lookups are cached for five minutes.
/// Only hits are cached: a business created after a miss is visible on the next webhook.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
    business_by_agent: Cache<String, Business>,
    business_by_phone: Cache<String, Business>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            business_by_agent: business_cache(),
            business_by_phone: business_cache(),
        }
    }
}

fn business_cache() -> Cache<String, Business> {
    Cache::builder()
        .time_to_live(Duration::from_secs(300))
        .max_capacity(10_000)
        .build()
}

fn parse_enum<T: FromStr<Err = AppError>>(row: &PgRow, column: &str) -> Result<T, AppError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
}

fn parse_optional_enum<T: FromStr<Err = AppError>>(
    row: &PgRow,
    column: &str,
) -> Result<Option<T>, AppError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| s.parse()).transpose()
}

fn call_from_row(row: &PgRow) -> Result<Call, AppError> {
    Ok(Call {
        id: row.try_get("id")?,
        call_id: row.try_get("call_id")?,
        caller_phone: row.try_get("caller_phone")?,
        business_ref: row.try_get("business_ref")?,
        status: parse_enum::<CallStatus>(row, "status")?,
        outcome: parse_optional_enum(row, "outcome")?,
        approval_status: parse_optional_enum(row, "approval_status")?,
        transcript: row.try_get("transcript")?,
        summary: row.try_get("summary")?,
        lead_name: row.try_get("lead_name")?,
        lead_address: row.try_get("lead_address")?,
        service_type: row.try_get("service_type")?,
        urgency: row.try_get("urgency")?,
        recording_url: row.try_get("recording_url")?,
        transcript_url: row.try_get("transcript_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn lead_from_row(row: &PgRow) -> Result<Lead, AppError> {
    Ok(Lead {
        id: row.try_get("id")?,
        business_id: row.try_get("business_id")?,
        call_id: row.try_get("call_id")?,
        caller_name: row.try_get("caller_name")?,
        caller_phone: row.try_get("caller_phone")?,
        service_needed: row.try_get("service_needed")?,
        notes: row.try_get("notes")?,
        source: parse_enum::<LeadSource>(row, "source")?,
        status: parse_enum::<LeadStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn retry_from_row(row: &PgRow) -> Result<WebhookRetryEntry, AppError> {
    Ok(WebhookRetryEntry {
        id: row.try_get("id")?,
        service: row.try_get("service")?,
        payload: row.try_get("payload")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        status: parse_enum::<RetryStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Empty strings are stored as NULL so later merges can still fill them.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl CallStorage for PgStorage {
    async fn find_call(&self, call_id: &str) -> Result<Option<Call>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM calls WHERE call_id = $1", CALL_COLUMNS))
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load call {}", call_id))?;

        row.as_ref().map(call_from_row).transpose()
    }

    async fn insert_call(&self, new: &NewCall) -> Result<InsertOutcome, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO calls (id, call_id, caller_phone, business_ref, status, outcome, \
                 approval_status, transcript, summary, lead_name, lead_address, service_type, \
                 urgency, recording_url)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (call_id) DO NOTHING
             RETURNING {}",
            CALL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.call_id)
        .bind(&new.caller_phone)
        .bind(&new.business_ref)
        .bind(CallStatus::Completed.as_str())
        .bind(new.outcome.as_str())
        .bind(ApprovalStatus::Pending.as_str())
        .bind(&new.transcript)
        .bind(non_empty(&new.lead.summary))
        .bind(non_empty(&new.lead.lead_name))
        .bind(non_empty(&new.lead.lead_address))
        .bind(non_empty(&new.lead.service_type))
        .bind(non_empty(&new.lead.urgency))
        .bind(&new.recording_url)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to insert call {}", new.call_id))?;

        if let Some(row) = row {
            return Ok(InsertOutcome::Inserted(call_from_row(&row)?));
        }

        // Conflict: the row already exists.
        match self.find_call(&new.call_id).await? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(AppError::InternalError(format!(
                "call {} conflicted on insert but could not be read back",
                new.call_id
            ))),
        }
    }

    async fn fill_missing(
        &self,
        call_id: &str,
        lead: &LeadFields,
    ) -> Result<Option<Call>, AppError> {
        // Single statement: COALESCE keeps every already-set column.
        let row = sqlx::query(&format!(
            "UPDATE calls SET
                 lead_name = COALESCE(lead_name, $2),
                 lead_address = COALESCE(lead_address, $3),
                 service_type = COALESCE(service_type, $4),
                 urgency = COALESCE(urgency, $5),
                 summary = COALESCE(summary, $6),
                 updated_at = now()
             WHERE call_id = $1
             RETURNING {}",
            CALL_COLUMNS
        ))
        .bind(call_id)
        .bind(non_empty(&lead.lead_name))
        .bind(non_empty(&lead.lead_address))
        .bind(non_empty(&lead.service_type))
        .bind(non_empty(&lead.urgency))
        .bind(non_empty(&lead.summary))
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to merge analysis into call {}", call_id))?;

        row.as_ref().map(call_from_row).transpose()
    }

    async fn set_approval(
        &self,
        call_id: &str,
        decision: ApprovalStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE calls SET approval_status = $2, updated_at = now()
             WHERE call_id = $1 AND approval_status = 'pending'",
        )
        .bind(call_id)
        .bind(decision.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to set approval on call {}", call_id))?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_pending(&self, business_ref: &str) -> Result<Option<Call>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM calls
             WHERE business_ref = $1 AND approval_status = 'pending'
             ORDER BY created_at DESC
             LIMIT 1",
            CALL_COLUMNS
        ))
        .bind(business_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(call_from_row).transpose()
    }

    async fn insert_lead(&self, new: &NewLead) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO leads (id, business_id, call_id, caller_name, caller_phone, \
                 service_needed, notes, source, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (call_id) DO NOTHING
             RETURNING {}",
            LEAD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.business_id)
        .bind(&new.call_id)
        .bind(&new.caller_name)
        .bind(&new.caller_phone)
        .bind(&new.service_needed)
        .bind(&new.notes)
        .bind(LeadSource::Call.as_str())
        .bind(LeadStatus::New.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to insert lead for call {}", new.call_id))?;

        row.as_ref().map(lead_from_row).transpose()
    }

    async fn recent_calls(&self, limit: i64) -> Result<Vec<Call>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM calls ORDER BY created_at DESC LIMIT $1",
            CALL_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(call_from_row).collect()
    }

    async fn count_calls(&self, business_ref: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM calls WHERE business_ref = $1")
            .bind(business_ref)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RetryStorage for PgStorage {
    async fn insert_retry(
        &self,
        service: &str,
        payload: &Value,
        error: &str,
    ) -> Result<WebhookRetryEntry, AppError> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO webhook_retries (id, service, payload, attempts, last_error, status, created_at, updated_at)
             VALUES ($1, $2, $3, 0, $4, $5, $6, $6)
             RETURNING {}",
            RETRY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(service)
        .bind(payload)
        .bind(error)
        .bind(RetryStatus::Pending.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to enqueue webhook retry")?;

        retry_from_row(&row)
    }

    async fn retry_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookRetryEntry>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM webhook_retries
             WHERE status IN ('pending', 'retrying') AND attempts < $1
             ORDER BY created_at
             LIMIT $2",
            RETRY_COLUMNS
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(retry_from_row).collect()
    }

    async fn save_retry(&self, entry: &WebhookRetryEntry) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE webhook_retries
             SET status = $2, attempts = $3, last_error = $4, updated_at = $5
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(entry.status.as_str())
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update retry entry {}", entry.id))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("retry entry {}", entry.id)));
        }
        Ok(())
    }

    async fn find_retry(&self, id: Uuid) -> Result<Option<WebhookRetryEntry>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhook_retries WHERE id = $1",
            RETRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(retry_from_row).transpose()
    }
}

#[async_trait]
impl BusinessDirectory for PgStorage {
    async fn find_by_agent_id(&self, agent_id: &str) -> Result<Option<Business>, AppError> {
        if let Some(business) = self.business_by_agent.get(agent_id).await {
            return Ok(Some(business));
        }

        let business = sqlx::query_as::<_, Business>(&format!(
            "SELECT {} FROM businesses WHERE agent_id = $1 LIMIT 1",
            BUSINESS_COLUMNS
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref business) = business {
            self.business_by_agent
                .insert(agent_id.to_string(), business.clone())
                .await;
        }
        Ok(business)
    }

    async fn find_by_owner_phone(&self, phone: &str) -> Result<Option<Business>, AppError> {
        if let Some(business) = self.business_by_phone.get(phone).await {
            return Ok(Some(business));
        }

        let business = sqlx::query_as::<_, Business>(&format!(
            "SELECT {} FROM businesses WHERE owner_phone = $1 ORDER BY created_at LIMIT 1",
            BUSINESS_COLUMNS
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref business) = business {
            tracing::debug!("Resolved owner phone to business {}", business.id);
            self.business_by_phone
                .insert(phone.to_string(), business.clone())
                .await;
        }
        Ok(business)
    }
}
