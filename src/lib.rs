//! # Lore - Context & Skill-Learning Engine
//!
//! Lore is the asynchronous post-ingest pipeline behind an AI-agent platform:
//! tenants push conversation messages into sessions, and the engine derives a
//! structured model of the work (ordered tasks with progress and user
//! preferences) and distills reusable skills (markdown + file bundles in a
//! content-addressed store) into per-user or per-project learning spaces. It
//! also brokers isolated sandbox execution environments for agents.
//!
//! ## Pipeline
//!
//! ```text
//! HTTP layer ──append message──> message store ──publish──> session-pending
//!                                                               │
//!                 ┌─────────────────────────────────────────────┘
//!                 ▼
//!        session-ingest controller ── per-session Redis lock
//!                 │  pending -> running -> task agent -> success/failed
//!                 ▼
//!        task-management agent (bounded tool-calling loop over the task graph)
//!                 │  task terminated?
//!                 ▼
//!        learning-skill event ──> skill-learn controller ── per-task lock
//!                 │  distill (one-shot forced tool call)
//!                 ▼
//!        skill-learner agent (edits SKILL.md bundles in the artifact store)
//! ```
//!
//! Delivery is at-least-once end to end: the broker retries transient
//! failures through a TTL-based delay queue and quarantines the rest to
//! dead-letter queues, stuck messages are reaped back to `pending`, and every
//! handler is idempotent.
//!
//! ## Module Overview
//!
//! - [`broker`]: AMQP topology, publishing, consumers with retry/DLX
//! - [`lock`]: Redis advisory locks with token-fenced release
//! - [`metrics`]: daily-bucketed counters behind a pg advisory lock
//! - [`storage`]: data services (messages, tasks, artifacts, skills, spaces)
//! - [`blob`]: content-addressed S3 storage for artifact bytes
//! - [`format`]: neutral message parts and wire-format conversion
//! - [`llm`]: the provider gateway (OpenAI, Anthropic, deterministic mock)
//! - [`agent`]: the bounded tool-calling loop and both concrete agents
//! - [`sandbox`]: backend-agnostic sandbox lifecycle with ID translation
//! - [`controller`]: the broker-driven orchestration layer
//! - [`app`]: explicit application container, staged init/shutdown

// Core type definitions
pub mod types;

// Error taxonomy
pub mod error;

// Configuration (env + YAML merge)
pub mod config;

// Pagination cursors
pub mod cursor;

// Message broker adapter
pub mod broker;

// Redis lock coordinator
pub mod lock;

// Metric counters
pub mod metrics;

// S3 blob store
pub mod blob;

// Message parts + wire formats
pub mod format;

// Data services
pub mod storage;

// LLM gateway
pub mod llm;

// Agents
pub mod agent;

// Sandbox broker
pub mod sandbox;

// Controllers
pub mod controller;

// Application container
pub mod app;

pub use blob::{AssetMeta, BlobStore};
pub use broker::{Broker, SessionPendingEvent, SkillLearnEvent};
pub use config::{CoreConfig, ProjectConfig};
pub use error::{EngineError, ErrorCode, Result};
pub use format::{MessageBlob, MessagePart, WireFormat};
pub use lock::LockCoordinator;
pub use llm::{
    ChatMessage, CompletionRequest, LlmProvider, LlmResponse, MockProvider, ToolCallRequest,
    ToolSchema,
};
pub use types::*;
