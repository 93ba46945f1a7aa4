//! Call Event Pipeline Library
//!
//! Ingests voice-provider and carrier webhooks, stores call records, extracts
//! leads, fans out notifications, runs the owner SMS approval workflow and
//! replays failed deliveries from a persistent retry queue.
//!
//! # Modules
//!
//! - `approval`: Owner YES/NO reply handling.
//! - `broadcast`: Live dashboard fan-out.
//! - `calls`: Call record lifecycle.
//! - `circuit_breaker`: Circuit breaker for outbound providers.
//! - `config`: Configuration management.
//! - `db`: Database connection and migrations.
//! - `db_storage`: Postgres storage backend.
//! - `errors`: Error handling types.
//! - `gateway`: Webhook entry point.
//! - `handlers` / `routes`: HTTP layer.
//! - `lead_extractor`: Analysis payload to lead fields.
//! - `memory_storage`: In-memory storage backend.
//! - `messages`: SMS and email bodies.
//! - `models`: Core data models.
//! - `notifications`: Notification dispatcher and delivery replay.
//! - `quota`: Trial call limits.
//! - `retry_queue`: Failed delivery queue and worker.
//! - `services`: SMS, email and blob clients.
//! - `storage`: Storage traits.
//! - `webhook_models`: Webhook payload models.

pub mod approval;
pub mod broadcast;
pub mod calls;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod lead_extractor;
pub mod memory_storage;
pub mod messages;
pub mod models;
pub mod notifications;
pub mod quota;
pub mod retry_queue;
pub mod routes;
pub mod services;
pub mod storage;
pub mod webhook_models;
