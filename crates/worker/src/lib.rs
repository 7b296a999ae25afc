//! Footprint score recomputation worker.
//!
//! This crate provides:
//! - SQLite storage for products, ingredients and emission factors, with
//!   change capture into a pending-change queue
//! - An atomic, lease-based claim protocol over that queue
//! - A dispatcher that recomputes one product, or fans out over every product
//!   using a changed emission factor
//! - Whole-product persistence and invalidation of contributions
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │  catalog writes (save_product / save_factor)   │
//! │        │  same transaction                     │
//! │        ▼                                       │
//! │  ┌───────────────┐                             │
//! │  │pending_changes│ ← SQLite (queue + source)   │
//! │  └──────┬────────┘                             │
//! │         │ reclaim expired leases               │
//! │         │ claim batch (pending → processing)   │
//! │  ┌──────▼────────┐                             │
//! │  │ClaimScheduler │  one per worker, N workers  │
//! │  │ (tokio task)  │                             │
//! │  └──────┬────────┘                             │
//! │  ┌──────▼────────┐   ┌──────────────────┐      │
//! │  │  Dispatcher   │──▶│ footprint-engine │      │
//! │  │ fan-out       │   │ (pure scoring)   │      │
//! │  └──────┬────────┘   └──────────────────┘      │
//! │         ▼                                      │
//! │  contributions: replace or invalidate          │
//! │  pending entry: delete                         │
//! └────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod recompute;
pub mod scheduler;
pub mod seed;
pub mod storage;

pub use footprint_core::{types::*, *};
