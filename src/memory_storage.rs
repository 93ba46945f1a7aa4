//! In-memory storage backend.
//!
//! Thread safe via a single `RwLock` over all tables, so every trait method is
//! atomic the same way the single-statement SQL in `db_storage` is.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    has_text, ApprovalStatus, Business, Call, CallStatus, InsertOutcome, Lead, LeadFields,
    LeadSource, LeadStatus, NewCall, NewLead, RetryStatus, WebhookRetryEntry,
};
use crate::storage::{BusinessDirectory, CallStorage, RetryStorage};

#[derive(Debug, Default)]
struct Tables {
    calls: HashMap<String, Call>,
    /// call_ids in insertion order; breaks `created_at` ties.
    call_order: Vec<String>,
    leads: HashMap<String, Lead>,
    retries: HashMap<Uuid, WebhookRetryEntry>,
    retry_order: Vec<Uuid>,
    businesses: Vec<Business>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_businesses(businesses: Vec<Business>) -> Self {
        let tables = Tables {
            businesses,
            ..Default::default()
        };
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Number of stored call rows.
    pub async fn call_count(&self) -> usize {
        self.tables.read().await.calls.len()
    }

    pub async fn leads(&self) -> Vec<Lead> {
        self.tables.read().await.leads.values().cloned().collect()
    }

    /// All retry entries, oldest first.
    pub async fn retries(&self) -> Vec<WebhookRetryEntry> {
        let tables = self.tables.read().await;
        tables
            .retry_order
            .iter()
            .filter_map(|id| tables.retries.get(id).cloned())
            .collect()
    }
}

fn fill(target: &mut Option<String>, value: &Option<String>) -> bool {
    if target.is_none() && has_text(value) {
        *target = value.clone();
        true
    } else {
        false
    }
}

#[async_trait]
impl CallStorage for MemoryStorage {
    async fn find_call(&self, call_id: &str) -> Result<Option<Call>, AppError> {
        Ok(self.tables.read().await.calls.get(call_id).cloned())
    }

    async fn insert_call(&self, new: &NewCall) -> Result<InsertOutcome, AppError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.calls.get(&new.call_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        let now = Utc::now();
        let call = Call {
            id: Uuid::new_v4(),
            call_id: new.call_id.clone(),
            caller_phone: new.caller_phone.clone(),
            business_ref: new.business_ref.clone(),
            status: CallStatus::Completed,
            outcome: Some(new.outcome),
            approval_status: Some(ApprovalStatus::Pending),
            transcript: new.transcript.clone(),
            summary: new.lead.summary.clone(),
            lead_name: new.lead.lead_name.clone(),
            lead_address: new.lead.lead_address.clone(),
            service_type: new.lead.service_type.clone(),
            urgency: new.lead.urgency.clone(),
            recording_url: new.recording_url.clone(),
            transcript_url: None,
            created_at: now,
            updated_at: now,
        };

        tables.calls.insert(call.call_id.clone(), call.clone());
        tables.call_order.push(call.call_id.clone());
        Ok(InsertOutcome::Inserted(call))
    }

    async fn fill_missing(
        &self,
        call_id: &str,
        lead: &LeadFields,
    ) -> Result<Option<Call>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(call) = tables.calls.get_mut(call_id) else {
            return Ok(None);
        };

        let mut changed = fill(&mut call.lead_name, &lead.lead_name);
        changed |= fill(&mut call.lead_address, &lead.lead_address);
        changed |= fill(&mut call.service_type, &lead.service_type);
        changed |= fill(&mut call.urgency, &lead.urgency);
        changed |= fill(&mut call.summary, &lead.summary);
        if changed {
            call.updated_at = Utc::now();
        }

        Ok(Some(call.clone()))
    }

    async fn set_approval(
        &self,
        call_id: &str,
        decision: ApprovalStatus,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.write().await;
        match tables.calls.get_mut(call_id) {
            Some(call) if call.is_pending_approval() => {
                call.approval_status = Some(decision);
                call.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn latest_pending(&self, business_ref: &str) -> Result<Option<Call>, AppError> {
        let tables = self.tables.read().await;
        let latest = tables
            .call_order
            .iter()
            .rev()
            .filter_map(|id| tables.calls.get(id))
            .find(|call| call.business_ref == business_ref && call.is_pending_approval())
            .cloned();
        Ok(latest)
    }

    async fn insert_lead(&self, new: &NewLead) -> Result<Option<Lead>, AppError> {
        let mut tables = self.tables.write().await;
        if tables.leads.contains_key(&new.call_id) {
            return Ok(None);
        }

        let lead = Lead {
            id: Uuid::new_v4(),
            business_id: new.business_id,
            call_id: new.call_id.clone(),
            caller_name: new.caller_name.clone(),
            caller_phone: new.caller_phone.clone(),
            service_needed: new.service_needed.clone(),
            notes: new.notes.clone(),
            source: LeadSource::Call,
            status: LeadStatus::New,
            created_at: Utc::now(),
        };
        tables.leads.insert(lead.call_id.clone(), lead.clone());
        Ok(Some(lead))
    }

    async fn recent_calls(&self, limit: i64) -> Result<Vec<Call>, AppError> {
        let tables = self.tables.read().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(tables
            .call_order
            .iter()
            .rev()
            .filter_map(|id| tables.calls.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn count_calls(&self, business_ref: &str) -> Result<i64, AppError> {
        let tables = self.tables.read().await;
        let count = tables
            .calls
            .values()
            .filter(|call| call.business_ref == business_ref)
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl RetryStorage for MemoryStorage {
    async fn insert_retry(
        &self,
        service: &str,
        payload: &Value,
        error: &str,
    ) -> Result<WebhookRetryEntry, AppError> {
        let now = Utc::now();
        let entry = WebhookRetryEntry {
            id: Uuid::new_v4(),
            service: service.to_string(),
            payload: payload.clone(),
            attempts: 0,
            last_error: Some(error.to_string()),
            status: RetryStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.write().await;
        tables.retries.insert(entry.id, entry.clone());
        tables.retry_order.push(entry.id);
        Ok(entry)
    }

    async fn retry_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookRetryEntry>, AppError> {
        let tables = self.tables.read().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(tables
            .retry_order
            .iter()
            .filter_map(|id| tables.retries.get(id))
            .filter(|entry| !entry.status.is_terminal() && entry.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_retry(&self, entry: &WebhookRetryEntry) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        match tables.retries.get_mut(&entry.id) {
            Some(stored) => {
                stored.status = entry.status;
                stored.attempts = entry.attempts;
                stored.last_error = entry.last_error.clone();
                stored.updated_at = entry.updated_at;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("retry entry {}", entry.id))),
        }
    }

    async fn find_retry(&self, id: Uuid) -> Result<Option<WebhookRetryEntry>, AppError> {
        Ok(self.tables.read().await.retries.get(&id).cloned())
    }
}

#[async_trait]
impl BusinessDirectory for MemoryStorage {
    async fn find_by_agent_id(&self, agent_id: &str) -> Result<Option<Business>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .businesses
            .iter()
            .find(|b| b.agent_id.as_deref() == Some(agent_id))
            .cloned())
    }

    async fn find_by_owner_phone(&self, phone: &str) -> Result<Option<Business>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .businesses
            .iter()
            .find(|b| b.owner_phone == phone)
            .cloned())
    }
}
