//! Connection lifecycle: opening the backend, building the registry,
//! reconciling the schema, patching the graph and handing out repositories.

pub mod marker;
pub mod schema;
mod transaction;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::backend::{default_opener, BackendOpener};
use crate::config::ServiceConfig;
use crate::error::{GraphError, Result};
use crate::patch::{PatchOutcome, Patcher};
use crate::persistence::GraphContext;
use crate::repository::Repository;
use crate::schema::{Model, Namespace, SchemaRegistry};

pub use schema::SchemaReport;
pub use transaction::{Transaction, TxState};

/// Lifecycle states of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not connected. The initial state and the state after shutdown.
    Started,
    /// `connect` in progress: schema reconciliation and patches run here.
    Connecting,
    /// Connected; repositories and transactions are available.
    Running,
    /// `shutdown` in progress.
    ShuttingDown,
}

/// Owner of the backend connection and the schema registry.
///
/// Namespaces are registered before [`connect`](Self::connect); every
/// connect builds a fresh registry from them plus the types declared in the
/// configuration.
pub struct Service {
    config: ServiceConfig,
    namespaces: Vec<Namespace>,
    opener: BackendOpener,
    state: Mutex<ServiceState>,
    context: RwLock<Option<GraphContext>>,
    repositories: Mutex<HashMap<String, Arc<Repository>>>,
    schema_report: Mutex<SchemaReport>,
    patch_outcome: Mutex<Option<PatchOutcome>>,
}

impl Service {
    /// Service in the `Started` state.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            namespaces: Vec::new(),
            opener: default_opener(),
            state: Mutex::new(ServiceState::Started),
            context: RwLock::new(None),
            repositories: Mutex::new(HashMap::new()),
            schema_report: Mutex::new(SchemaReport::default()),
            patch_outcome: Mutex::new(None),
        }
    }

    /// Registers a namespace of types and patches.
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    /// Replaces the function opening the backend on connect.
    pub fn with_opener(mut self, opener: BackendOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// True while connected.
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Opens the backend and brings the graph up to date. Any failure closes
    /// the backend again and leaves the service in
    /// [`ServiceState::Started`].
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ServiceState::Started {
                return Err(GraphError::AlreadyRunning);
            }
            *state = ServiceState::Connecting;
        }
        info!(location = ?self.config.location, version = %self.config.version, "connecting");

        match self.start() {
            Ok(()) => {
                *self.state.lock() = ServiceState::Running;
                info!("service running");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "connect failed");
                self.release();
                *self.state.lock() = ServiceState::Started;
                Err(err)
            }
        }
    }

    fn start(&self) -> Result<()> {
        let mut registry = SchemaRegistry::new();
        for namespace in &self.namespaces {
            registry.register(namespace.clone())?;
        }
        if let Some(namespace) = self.config.namespace() {
            registry.register(namespace)?;
        }
        registry.build()?;
        let backend = (self.opener)(&self.config)?;
        *self.context.write() = Some(GraphContext::new(backend, Arc::new(registry)));

        let stored = self.transaction(|tx| {
            let backend = tx.context().backend();
            marker::ensure(backend)?;
            marker::read_version(backend)
        })?;
        debug!(stored = %stored, "graph version read");

        let report = self.reconcile_schema()?;
        debug!(created = report.created.len(), dropped = report.dropped.len(), "schema reconciled");

        let patches = self.context()?.registry().patches().to_vec();
        let outcome = Patcher::new(self, patches).run(&stored, &self.config.version)?;
        *self.patch_outcome.lock() = Some(outcome);
        Ok(())
    }

    /// Disposes repositories and closes the backend.
    fn release(&self) {
        for (_, repository) in self.repositories.lock().drain() {
            repository.dispose();
        }
        if let Some(ctx) = self.context.write().take() {
            if let Err(err) = ctx.backend().close() {
                warn!(error = %err, "closing backend failed");
            }
        }
    }

    /// Disposes repositories, closes the backend and returns to `Started`.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ServiceState::Running {
                return Err(GraphError::NotRunning);
            }
            *state = ServiceState::ShuttingDown;
        }
        self.release();
        *self.state.lock() = ServiceState::Started;
        info!("service shut down");
        Ok(())
    }

    /// Backend and registry; available while connecting and running.
    pub fn context(&self) -> Result<GraphContext> {
        match self.state() {
            ServiceState::Connecting | ServiceState::Running => {}
            _ => return Err(GraphError::NotRunning),
        }
        self.context.read().clone().ok_or(GraphError::NotRunning)
    }

    /// Cached repository of the named type.
    pub fn repository(&self, name: &str) -> Result<Arc<Repository>> {
        let ctx = self.context()?;
        let mut repositories = self.repositories.lock();
        if let Some(repository) = repositories.get(name) {
            return Ok(Arc::clone(repository));
        }
        let ty = ctx.registry().model_for(name)?;
        let repository = Arc::new(Repository::new(ctx, ty));
        repositories.insert(name.to_owned(), Arc::clone(&repository));
        debug!(entity = name, "repository created");
        Ok(repository)
    }

    /// Repository of a model type.
    pub fn repository_for<M: Model>(&self) -> Result<Arc<Repository>> {
        self.repository(M::TYPE)
    }

    /// Opens a transaction guard.
    pub fn begin(&self) -> Result<Transaction> {
        Transaction::begin(self.context()?)
    }

    /// Runs `f` in a transaction: committed on `Ok`, rolled back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let tx = self.begin()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Version currently stored in the graph marker.
    pub fn graph_version(&self) -> Result<String> {
        marker::read_version(self.context()?.backend())
    }

    /// Reconciles constraints and indices with the registry.
    pub fn reconcile_schema(&self) -> Result<SchemaReport> {
        let report = self.transaction(|tx| {
            let ctx = tx.context();
            schema::reconcile(ctx.backend(), ctx.registry())
        })?;
        *self.schema_report.lock() = report.clone();
        Ok(report)
    }

    /// Report of the last reconciliation.
    pub fn schema_report(&self) -> SchemaReport {
        self.schema_report.lock().clone()
    }

    /// What the patcher did during the last connect.
    pub fn patch_outcome(&self) -> Option<PatchOutcome> {
        self.patch_outcome.lock().clone()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("namespaces", &self.namespaces)
            .finish_non_exhaustive()
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "shutdown on drop failed");
            }
        }
    }
}
