//! Persistence seams.
//!
//! Services depend on these traits only. `db_storage::PgStorage` is the
//! production backend; `memory_storage::MemoryStorage` backs tests and local runs.
//! Both enforce idempotent call creation and fill-only-missing merges at the
//! storage layer so concurrent webhooks cannot interleave a read-modify-write.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    ApprovalStatus, Business, Call, InsertOutcome, Lead, LeadFields, NewCall, NewLead,
    WebhookRetryEntry,
};

#[async_trait]
pub trait CallStorage: Send + Sync {
    async fn find_call(&self, call_id: &str) -> Result<Option<Call>, AppError>;

    /// Insert unless a call with the same `call_id` exists, in which case the
    /// stored row is returned untouched.
    async fn insert_call(&self, call: &NewCall) -> Result<InsertOutcome, AppError>;

    /// Write each non-empty field of `lead` only where the stored value is null.
    /// Returns `None` when the call doesn't exist.
    async fn fill_missing(&self, call_id: &str, lead: &LeadFields)
        -> Result<Option<Call>, AppError>;

    /// Move a pending call to `decision`. Returns false if the call was not
    /// pending (already decided, or never awaiting approval).
    async fn set_approval(&self, call_id: &str, decision: ApprovalStatus)
        -> Result<bool, AppError>;

    /// Most recently created pending call for a business.
    async fn latest_pending(&self, business_ref: &str) -> Result<Option<Call>, AppError>;

    /// At most one lead per call. Returns `None` if one already exists.
    async fn insert_lead(&self, lead: &NewLead) -> Result<Option<Lead>, AppError>;

    /// Newest first.
    async fn recent_calls(&self, limit: i64) -> Result<Vec<Call>, AppError>;

    async fn count_calls(&self, business_ref: &str) -> Result<i64, AppError>;
}

#[async_trait]
pub trait RetryStorage: Send + Sync {
    /// New entry with `attempts = 0` and status `pending`.
    async fn insert_retry(
        &self,
        service: &str,
        payload: &Value,
        error: &str,
    ) -> Result<WebhookRetryEntry, AppError>;

    /// Non-terminal entries with `attempts < max_attempts`, oldest first.
    /// Backoff filtering is left to the caller.
    async fn retry_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookRetryEntry>, AppError>;

    /// Persist status, attempts, last_error and updated_at of an entry.
    async fn save_retry(&self, entry: &WebhookRetryEntry) -> Result<(), AppError>;

    async fn find_retry(&self, id: Uuid) -> Result<Option<WebhookRetryEntry>, AppError>;
}

/// Read-only view of business configuration.
#[async_trait]
pub trait BusinessDirectory: Send + Sync {
    async fn find_by_agent_id(&self, agent_id: &str) -> Result<Option<Business>, AppError>;

    /// Exact match on the stored owner phone.
    async fn find_by_owner_phone(&self, phone: &str) -> Result<Option<Business>, AppError>;
}
