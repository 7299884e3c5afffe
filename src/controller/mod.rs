//! Broker-driven controllers
//!
//! The orchestration layer between the message broker and the agents:
//! `ingest` drains session-pending buffers through the task-management agent,
//! `skill_learn` turns terminated tasks into skill updates.

pub mod ingest;
pub mod skill_learn;
