//! Pure domain logic for the portal's application access-resolution engine.
//!
//! The portal backend brokers employee access to a set of downstream
//! line-of-business applications. This crate holds the parts of that
//! decision that are pure computation:
//!
//! - [`directory`]: the canonical application registry (id ↔ code ↔ status)
//!   and the [`Directory`] lookup seam the rest of the engine resolves
//!   against.
//! - [`policy`]: the tolerant decoder for a department's stored default-app
//!   expression, which in production data may be a JSON array of numeric
//!   ids, a JSON array of code strings, or a comma-separated list of either.
//! - [`resolver`]: the resolution kernel that reconciles a department's
//!   default policy with a user's per-user override record into one
//!   authoritative accessible set.
//!
//! Everything here is synchronous, allocation-light, and free of I/O; the
//! store-backed engine in `atrium-daemon` supplies a [`Directory`]
//! implementation over its database and feeds store rows into
//! [`resolver::resolve`].

pub mod directory;
pub mod policy;
pub mod resolver;

pub use directory::{
    AppEntry, AppId, AppStatus, Application, Directory, DirectoryError, InMemoryDirectory,
};
pub use policy::{
    DepartmentPolicy, PolicySource, decode_expression, parse_expression, resolve_source,
};
pub use resolver::{InvariantViolation, OverrideState, Resolution, partition_submission, resolve};
