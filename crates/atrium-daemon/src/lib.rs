//! Store-backed application access-resolution engine for the portal
//! backend.
//!
//! The portal brokers employee access to downstream line-of-business
//! applications. This crate is the engine that decides, for a given
//! employee, exactly which applications they may see and launch, and
//! keeps the denormalized cache of that decision consistent across every
//! mutation that can invalidate it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                AccessService                 │
//! │  effective_access / set_privilege /          │
//! │  toggle_policy_entry / reassign / create     │
//! │                                              │
//! │  ┌───────────────┐      ┌─────────────────┐  │
//! │  │  sync writer  │◄─────│  resolver       │  │
//! │  │  (cache owns) │      │  (atrium-core)  │  │
//! │  └──────┬────────┘      └────────▲────────┘  │
//! │         │                        │           │
//! │  ┌──────▼────────────────────────┴────────┐  │
//! │  │        StoreHandle (SQLite, WAL)       │  │
//! │  │  applications / departments / users /  │  │
//! │  │  access_overrides                      │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The pure pieces (policy parsing, resolution) live in `atrium-core`;
//! this crate supplies the stores, the transactional mutation paths, the
//! cache writer, audit notification, and configuration. The HTTP layer
//! in front and the session machinery around it are separate services
//! that call into [`access::AccessService`].

pub mod access;
pub mod audit;
pub mod config;
pub mod store;
pub mod sync;

pub use access::{AccessError, AccessService, MAX_SUBMITTED_APPS};
pub use audit::{AuditSink, ChannelAuditSink, NoopAuditSink, TracingAuditSink};
pub use config::{AuditConfig, ConfigError, EngineConfig, StoreConfig};
pub use store::{
    DEFAULT_BUSY_TIMEOUT, DepartmentStore, OverrideRow, OverrideStore, SqliteDirectory,
    StoreError, StoreHandle, UserId, UserRecord, UserStore,
};
pub use sync::{SyncFailure, SyncOutcome, SyncReport, sync_department, sync_user};
