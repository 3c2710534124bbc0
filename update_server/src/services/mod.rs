//! Management and tracking services — all state mutation funnels through
//! these modules.
//!
//! Service functions are free functions over the shared [`crate::store::Store`]
//! and [`crate::events::EventBus`]. Mutations run inside one store
//! transaction; change events are collected during the transaction and
//! published after it commits, so subscribers always observe committed state.

pub mod action_service;
pub mod assignment_service;
pub mod auto_assign;
pub mod ds_service;
pub mod executor;
pub mod feedback;
pub mod filter_service;
pub mod rollout_service;
