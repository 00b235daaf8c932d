//! Version-gated migration units and the runner applying them.

mod patcher;
mod version;

use std::fmt;

use crate::error::Result;
use crate::service::Service;

pub use patcher::{PatchOutcome, Patcher};
pub use version::{AppVersion, NO_VERSION};

/// Application version that turns migrations off.
pub const UNDEFINED_VERSION: &str = "undefined";

/// One migration step, applied once when the stored graph version moves
/// past [`version`](Patch::version).
///
/// Patches of the same version run ordered by priority, then by name. Each
/// runs in its own transaction.
pub trait Patch: Send + Sync {
    /// Version this patch brings the graph to.
    fn version(&self) -> &str;

    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn apply(&self, service: &Service) -> Result<()>;
}

/// Patch backed by a closure.
pub struct FnPatch<F> {
    version: String,
    name: String,
    priority: i32,
    apply: F,
}

impl<F> FnPatch<F>
where
    F: Fn(&Service) -> Result<()> + Send + Sync,
{
    /// Patch named `name` bringing the graph to `version`.
    pub fn new(version: impl Into<String>, name: impl Into<String>, apply: F) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            priority: 0,
            apply,
        }
    }

    /// Lower priorities run first within a version.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl<F> Patch for FnPatch<F>
where
    F: Fn(&Service) -> Result<()> + Send + Sync,
{
    fn version(&self) -> &str {
        &self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, service: &Service) -> Result<()> {
        (self.apply)(service)
    }
}

impl<F> fmt::Debug for FnPatch<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPatch")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
