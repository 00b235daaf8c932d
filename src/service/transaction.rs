use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::persistence::GraphContext;

/// Where a [`Transaction`] guard stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Open; saves and removals join it.
    Active,
    /// Committed successfully.
    Committed,
    /// Rolled back explicitly, on drop, or by a failed commit.
    RolledBack,
}

/// Scope of one backend transaction.
///
/// `commit` and `rollback` consume the guard. Dropping a guard that is still
/// active rolls the transaction back. Guards opened while another one is
/// active join it: a nested rollback makes the outer commit fail with
/// [`GraphError::RolledBack`].
///
/// # Example
///
/// ```rust
/// use penumbra::{Service, ServiceConfig};
///
/// let service = Service::new(ServiceConfig::default());
/// service.connect()?;
/// let tx = service.begin()?;
/// // saves through repositories run inside `tx`
/// tx.commit()?;
/// service.shutdown()?;
/// # Ok::<(), penumbra::GraphError>(())
/// ```
#[derive(Debug)]
pub struct Transaction {
    ctx: GraphContext,
    state: TxState,
    started: Instant,
}

impl Transaction {
    pub(crate) fn begin(ctx: GraphContext) -> Result<Self> {
        ctx.backend().begin()?;
        debug!("transaction started");
        Ok(Self {
            ctx,
            state: TxState::Active,
            started: Instant::now(),
        })
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Graph context the transaction runs on.
    pub fn context(&self) -> &GraphContext {
        &self.ctx
    }

    /// Commits; fails with `RolledBack` after a nested rollback.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        match self.ctx.backend().commit() {
            Ok(()) => {
                self.state = TxState::Committed;
                debug!(
                    duration_us = self.started.elapsed().as_micros() as u64,
                    "transaction committed"
                );
                Ok(())
            }
            Err(err) => {
                self.state = TxState::RolledBack;
                warn!(error = %err, "transaction commit failed");
                Err(err)
            }
        }
    }

    /// Rolls back.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxState::RolledBack;
        let result = self.ctx.backend().rollback();
        debug!("transaction rolled back");
        result
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(GraphError::InvalidArgument(
                "transaction is no longer active".into(),
            ));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            self.state = TxState::RolledBack;
            let _ = self.ctx.backend().rollback();
            warn!("transaction dropped without commit, rolled back");
        }
    }
}
