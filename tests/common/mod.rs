//! Shared fixtures: in-memory storage plus recording SMS/email fakes.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use call_pipeline_api::broadcast::BroadcastHub;
use call_pipeline_api::calls::CallRecordStore;
use call_pipeline_api::errors::AppError;
use call_pipeline_api::gateway::IngestGateway;
use call_pipeline_api::handlers::AppState;
use call_pipeline_api::memory_storage::MemoryStorage;
use call_pipeline_api::models::Business;
use call_pipeline_api::notifications::{Channels, NotificationDispatcher};
use call_pipeline_api::quota::TrialQuotaChecker;
use call_pipeline_api::retry_queue::RetryQueue;
use call_pipeline_api::services::{EmailSender, OutboundEmail, SmsSender};

pub const OWNER_PHONE: &str = "+15550009999";
pub const CALLER_PHONE: &str = "+15551234567";
pub const AGENT_ID: &str = "agent-acme";

/// Records every SMS; the first `failures` sends return an error.
#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
    failures: AtomicUsize,
}

impl RecordingSms {
    pub fn failing(failures: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn sent_to(&self, to: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(recipient, _)| recipient == to)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AppError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::DeliveryFailed("carrier unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send_email(&self, email: &OutboundEmail) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Never answers; exercises the per-task timeout.
pub struct HangingEmail;

#[async_trait]
impl EmailSender for HangingEmail {
    async fn send_email(&self, _email: &OutboundEmail) -> Result<(), AppError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn business(requires_approval: bool) -> Business {
    Business {
        id: Uuid::new_v4(),
        name: "Acme Plumbing".to_string(),
        owner_name: Some("Pat".to_string()),
        owner_phone: OWNER_PHONE.to_string(),
        owner_email: Some("owner@acme.test".to_string()),
        agent_id: Some(AGENT_ID.to_string()),
        requires_approval,
        is_trial: false,
    }
}

pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub sms: Arc<RecordingSms>,
    pub email: Arc<RecordingEmail>,
    pub hub: BroadcastHub,
    pub queue: Arc<RetryQueue>,
    pub gateway: Arc<IngestGateway>,
}

impl Harness {
    pub fn new(businesses: Vec<Business>) -> Self {
        Self::with_sms(businesses, RecordingSms::default())
    }

    pub fn with_sms(businesses: Vec<Business>, sms: RecordingSms) -> Self {
        let storage = Arc::new(MemoryStorage::with_businesses(businesses));
        let sms = Arc::new(sms);
        let email = Arc::new(RecordingEmail::default());
        let hub = BroadcastHub::new();
        let queue = Arc::new(RetryQueue::new(storage.clone(), 50));

        let dispatcher = NotificationDispatcher::new(hub.clone(), Duration::from_secs(2))
            .with_sms(sms.clone())
            .with_email(email.clone())
            .with_retry_queue(queue.clone());
        let quota = Arc::new(TrialQuotaChecker::new(storage.clone(), 50));
        let calls = Arc::new(CallRecordStore::new(storage.clone(), quota));
        let gateway = Arc::new(IngestGateway::new(calls, storage.clone(), Arc::new(dispatcher)));

        Self {
            storage,
            sms,
            email,
            hub,
            queue,
            gateway,
        }
    }

    pub fn channels(&self) -> Channels {
        Channels {
            sms: Some(self.sms.clone()),
            email: Some(self.email.clone()),
        }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            gateway: self.gateway.clone(),
            hub: self.hub.clone(),
        })
    }
}

pub fn call_ended(call_id: &str, custom: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "event": "call_ended",
        "data": {
            "call_id": call_id,
            "from_number": CALLER_PHONE,
            "agent_id": AGENT_ID,
            "transcript": "Agent: Hello. Caller: Hi.",
            "call_analysis": {
                "call_summary": "Caller needs help",
                "custom_analysis_data": custom
            }
        }
    })
}
