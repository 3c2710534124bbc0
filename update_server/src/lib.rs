//! Fleetup — multi-tenant device update management.
//!
//! The rollout orchestration core: staged deployment campaigns over
//! filtered target populations, action/status tracking against a strict
//! state machine, filter-driven auto-assignment, and entity-change event
//! propagation. Device-facing transports and the management API are thin
//! adapters over the services in this crate.

pub mod artifacts;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod metrics;
pub mod models;
pub mod overdue;
pub mod seeder;
pub mod services;
pub mod store;
pub mod tenant;
