//! Bounded-wait acquisition
//!
//! One `acquire` call is a small state machine:
//!
//! ```text
//! Selecting --node--> Borrowing --ok--> Succeeded
//!    ^  |                 |
//!    |  +--none: backoff--+--exhausted/failed--> Selecting
//!    |
//!    +--deadline passed or pool closed--> Failed
//! ```
//!
//! Each borrow is short, so a node suspended or removed while a caller waits
//! is noticed on the next selection.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::cluster_pool::{Inner, PoolError};
use super::connection::PooledConnection;
use super::keyed::BorrowError;
use crate::factory::ConnectionFactory;
use crate::lb::PooledNode;

pub(crate) enum AcquireState<C> {
    Selecting,
    Borrowing(Arc<PooledNode>),
    Succeeded(PooledConnection<C>),
    Failed(PoolError),
}

pub(crate) struct Acquire<'a, F: ConnectionFactory> {
    inner: &'a Inner<F>,
    exclude_hint: Option<&'a str>,
    started: Instant,
    deadline: Option<Instant>,
    attempts: u32,
}

impl<'a, F: ConnectionFactory> Acquire<'a, F> {
    /// The deadline is fixed here, once per call
    pub(crate) fn new(inner: &'a Inner<F>, exclude_hint: Option<&'a str>) -> Self {
        let started = inner.clock.now();
        let deadline = inner
            .policy
            .max_wait_for_connection()
            .map(|wait| started + wait);

        Self {
            inner,
            exclude_hint,
            started,
            deadline,
            attempts: 0,
        }
    }

    pub(crate) async fn run(mut self) -> Result<PooledConnection<F::Connection>, PoolError> {
        let mut state = AcquireState::Selecting;
        loop {
            state = match state {
                AcquireState::Selecting => self.select().await,
                AcquireState::Borrowing(node) => self.borrow(node).await,
                AcquireState::Succeeded(connection) => return Ok(connection),
                AcquireState::Failed(e) => return Err(e),
            };
        }
    }

    async fn select(&mut self) -> AcquireState<F::Connection> {
        if self.inner.keyed.is_closed() {
            return AcquireState::Failed(PoolError::PoolShutdown);
        }

        if let Some(deadline) = self.deadline {
            let now = self.inner.clock.now();
            if now >= deadline {
                let waited = now.duration_since(self.started);
                error!(
                    waited_ms = waited.as_millis() as u64,
                    attempts = self.attempts,
                    "Failed to get a connection within the maximum allowed wait time"
                );
                return AcquireState::Failed(PoolError::NoConnectionsAvailable { waited });
            }
        }

        let candidates = self.inner.table.candidates();
        match self.inner.selection.select(&candidates, self.exclude_hint) {
            Some(node) => AcquireState::Borrowing(node),
            None => {
                debug!(
                    candidates = candidates.len(),
                    "No eligible node; backing off before selecting again"
                );
                self.backoff().await;
                AcquireState::Selecting
            }
        }
    }

    async fn borrow(&mut self, node: Arc<PooledNode>) -> AcquireState<F::Connection> {
        self.attempts += 1;

        match self.inner.keyed.borrow(node.address()).await {
            Ok(connection) => {
                self.inner.table.stats.connection_borrowed();
                // The address may have been removed and re-added since selection
                if let Some(current) = self.inner.table.current(node.address(), connection.gauge()) {
                    current.report_connection_borrowed();
                }
                AcquireState::Succeeded(connection)
            }
            Err(BorrowError::Closed) => AcquireState::Failed(PoolError::PoolShutdown),
            Err(e @ BorrowError::CreateFailed { .. }) => {
                warn!(node = %node.address(), error = %e, "Failed to borrow connection; trying another node");
                self.backoff().await;
                AcquireState::Selecting
            }
            Err(e) => {
                debug!(node = %node.address(), error = %e, "Node unavailable; trying another node");
                AcquireState::Selecting
            }
        }
    }

    /// Sleep the borrow wait, never past the deadline
    async fn backoff(&self) {
        let mut pause = self.inner.policy.borrow_wait();
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(self.inner.clock.now());
            pause = pause.min(remaining);
        }
        if pause > Duration::ZERO {
            self.inner.clock.sleep(pause).await;
        }
    }
}
