//! Notifications Domain
//!
//! Asynchronous email delivery for account lifecycle transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Lifecycle Engine│  ← queues email jobs
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ NotificationSvc │  ← composes jobs, publishes via JobQueue
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Redis Stream  │  ← email:jobs (at-least-once, consumer group)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  Email Worker   │  ← renders templates, sends, acks
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Email Provider  │  ← SMTP transport
//! └─────────────────┘
//! ```
//!
//! The publisher replies to its caller without waiting for delivery; the
//! worker is a single long-lived background task per process.

pub mod error;
pub mod models;
pub mod providers;
pub mod queue;
pub mod service;
pub mod templates;
pub mod worker;

pub use error::{NotificationError, NotificationResult};
pub use models::{EmailJob, EmailKind};
pub use providers::{EmailContent, EmailProvider, SentEmail, SmtpConfig, SmtpProvider};
pub use queue::{InMemoryQueue, JobQueue, RedisStreamQueue, StreamConfig};
pub use service::{NotificationConfig, NotificationService};
pub use templates::TemplateEngine;
pub use worker::{EmailWorker, WorkerConfig};
