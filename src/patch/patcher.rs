use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{AppVersion, Patch, UNDEFINED_VERSION};
use crate::error::{GraphError, Result};
use crate::service::{marker, Service};

/// What a patcher run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The application version is undefined.
    Disabled,
    /// The stored version already matches.
    UpToDate,
    /// The stored graph is newer than the application.
    Ahead {
        /// Version found in the graph.
        stored: String,
        /// Patches between the application and the stored version.
        skipped: usize,
    },
    /// The stored version moved from `from` to `to`.
    Applied {
        /// Version before the run.
        from: String,
        /// Version after the run.
        to: String,
        /// Patches executed.
        patches: usize,
    },
}

/// Brings the stored graph version up to the application version.
pub struct Patcher<'s> {
    service: &'s Service,
    patches: Vec<Arc<dyn Patch>>,
}

impl<'s> Patcher<'s> {
    /// Patcher over the given units.
    pub fn new(service: &'s Service, patches: Vec<Arc<dyn Patch>>) -> Self {
        Self { service, patches }
    }

    /// Applies every patch with a version in `(stored, application]`,
    /// grouped by version. The stored version is committed after each
    /// group, so a failure leaves it at the last completed group.
    pub fn run(&self, stored: &str, application: &str) -> Result<PatchOutcome> {
        if application == UNDEFINED_VERSION {
            info!("application version undefined, migrations disabled");
            return Ok(PatchOutcome::Disabled);
        }
        let target = AppVersion::parse(application)?;
        let current = AppVersion::parse(stored)?;

        if current > target {
            let skipped = self.between(&target, &current)?.values().map(Vec::len).sum();
            warn!(
                stored = %current,
                application = %target,
                skipped,
                "stored graph is newer than the application"
            );
            return Ok(PatchOutcome::Ahead {
                stored: current.to_string(),
                skipped,
            });
        }
        if current == target {
            debug!(version = %current, "graph version up to date");
            return Ok(PatchOutcome::UpToDate);
        }

        let groups = self.between(&current, &target)?;
        let mut applied = 0;
        for (version, group) in &groups {
            for patch in group {
                info!(version = %version, patch = patch.name(), "applying patch");
                self.service
                    .transaction(|_| patch.apply(self.service))
                    .map_err(|err| {
                        GraphError::fatal_migration(version.to_string(), patch.name().to_owned(), err)
                    })?;
                applied += 1;
            }
            self.store(version)?;
        }
        if groups.keys().next_back() != Some(&target) {
            self.store(&target)?;
        }
        info!(from = %current, to = %target, patches = applied, "graph patched");
        Ok(PatchOutcome::Applied {
            from: current.to_string(),
            to: target.to_string(),
            patches: applied,
        })
    }

    fn store(&self, version: &AppVersion) -> Result<()> {
        self.service
            .transaction(|tx| marker::write_version(tx.context().backend(), &version.to_string()))
    }

    /// Patches with `low < version <= high`, grouped by version and ordered
    /// by priority then name within a group.
    fn between(
        &self,
        low: &AppVersion,
        high: &AppVersion,
    ) -> Result<BTreeMap<AppVersion, Vec<Arc<dyn Patch>>>> {
        let mut groups: BTreeMap<AppVersion, Vec<Arc<dyn Patch>>> = BTreeMap::new();
        for patch in &self.patches {
            let version = AppVersion::parse(patch.version())?;
            if &version > low && &version <= high {
                groups.entry(version).or_default().push(Arc::clone(patch));
            }
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| {
                a.priority()
                    .cmp(&b.priority())
                    .then_with(|| a.name().cmp(b.name()))
            });
        }
        Ok(groups)
    }
}
