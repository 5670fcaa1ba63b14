//! The application directory: the canonical registry mapping application
//! id ↔ human code ↔ status.
//!
//! Every other component resolves against this registry. The engine never
//! creates or edits applications (that is admin CRUD territory); it only
//! looks them up, so the seam is a small read-only trait with two batch
//! lookup operations. Inputs with no match are simply absent from the
//! result, never an error: department policy rows routinely reference
//! applications that have since been deleted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an application in the directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AppId(pub i64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AppId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Lifecycle status of a directory entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    /// The application is live and launchable.
    #[default]
    Active,
    /// The application is registered but retired from the portal.
    Inactive,
}

impl AppStatus {
    /// Parses a status from its stored string form.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::InvalidStatus` if the string is not
    /// "active" or "inactive".
    pub fn parse(s: &str) -> Result<Self, DirectoryError> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(DirectoryError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }

    /// Returns the string representation of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A full directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Application {
    /// Directory identifier.
    pub id: AppId,

    /// Unique human code. Uppercase is the canonical form; lookups fold
    /// case before matching.
    pub code: String,

    /// Display name.
    pub name: String,

    /// Lifecycle status.
    pub status: AppStatus,
}

/// The (id, code) pair returned by directory lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppEntry {
    /// Directory identifier.
    pub id: AppId,
    /// Canonical (uppercase) code.
    pub code: String,
}

/// Errors from directory lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DirectoryError {
    /// A stored status string was not recognized.
    #[error("invalid application status: {value}")]
    InvalidStatus {
        /// The unrecognized stored value.
        value: String,
    },

    /// The backing registry could not be reached. Retryable.
    #[error("application directory unavailable: {message}")]
    Unavailable {
        /// Underlying cause.
        message: String,
    },
}

/// Read-only lookup seam over the application registry.
///
/// Implementations must treat unknown ids and codes as absent rather than
/// erroring, and must return entries with codes in canonical uppercase
/// form. Errors are reserved for the registry itself being unreachable.
pub trait Directory {
    /// Resolves ids to (id, code) pairs. Unknown ids are dropped.
    fn lookup_codes_by_ids(&self, ids: &[AppId]) -> Result<Vec<AppEntry>, DirectoryError>;

    /// Resolves codes (case-insensitively) to (id, code) pairs. Unknown
    /// codes are dropped.
    fn lookup_ids_by_codes(&self, codes: &[String]) -> Result<Vec<AppEntry>, DirectoryError>;
}

/// Map-backed directory used by unit tests and by callers that want the
/// resolver without a database behind it.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    by_id: BTreeMap<AppId, Application>,
    by_code: HashMap<String, AppId>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an application, replacing any previous entry with the
    /// same id. The code is folded to canonical uppercase form.
    pub fn insert(&mut self, app: Application) {
        let code = app.code.to_uppercase();
        let id = app.id;
        if let Some(previous) = self.by_id.insert(
            id,
            Application {
                code: code.clone(),
                ..app
            },
        ) {
            self.by_code.remove(&previous.code);
        }
        self.by_code.insert(code, id);
    }

    /// Convenience constructor from (id, code) pairs, all active.
    #[must_use]
    pub fn with_entries(entries: &[(i64, &str)]) -> Self {
        let mut directory = Self::new();
        for (id, code) in entries {
            directory.insert(Application {
                id: AppId(*id),
                code: (*code).to_string(),
                name: (*code).to_string(),
                status: AppStatus::Active,
            });
        }
        directory
    }

    /// Returns the entry for an id, if registered.
    #[must_use]
    pub fn get(&self, id: AppId) -> Option<&Application> {
        self.by_id.get(&id)
    }

    /// Number of registered applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Directory for InMemoryDirectory {
    fn lookup_codes_by_ids(&self, ids: &[AppId]) -> Result<Vec<AppEntry>, DirectoryError> {
        let mut entries: Vec<AppEntry> = ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|app| AppEntry {
                id: app.id,
                code: app.code.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries.dedup_by_key(|entry| entry.id);
        Ok(entries)
    }

    fn lookup_ids_by_codes(&self, codes: &[String]) -> Result<Vec<AppEntry>, DirectoryError> {
        let mut entries: Vec<AppEntry> = codes
            .iter()
            .filter_map(|code| self.by_code.get(&code.trim().to_uppercase()))
            .filter_map(|id| self.by_id.get(id))
            .map(|app| AppEntry {
                id: app.id,
                code: app.code.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries.dedup_by_key(|entry| entry.id);
        Ok(entries)
    }
}
