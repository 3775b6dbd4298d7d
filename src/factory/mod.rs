//! Connection factory contract
//!
//! The pool knows nothing about the wire protocol. Everything it needs to
//! manage the lifecycle of one connection is expressed by [`ConnectionFactory`]:
//! - `create`: open a connection bound to a node address
//! - `destroy`: close a connection that leaves the pool
//! - `validate`: decide whether a returned connection may be recycled
//! - `on_passivate`: last look at a returned connection, able to flag corruption

pub mod tcp;

pub use tcp::TcpConnectionFactory;

use anyhow::Result;
use async_trait::async_trait;

/// Creates, destroys and validates connections for the backing pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The raw connection type handed out to callers
    type Connection: Send + 'static;

    /// Open a new connection to `address`
    async fn create(&self, address: &str) -> Result<Self::Connection>;

    /// Close a connection that is leaving the pool for good
    async fn destroy(&self, address: &str, connection: Self::Connection);

    /// Whether a connection being returned is still usable
    fn validate(&self, address: &str, connection: &Self::Connection) -> bool;

    /// Called on every return before validation
    ///
    /// Returning `true` marks the connection corrupted: it is destroyed and
    /// counted against its node as if the caller had flagged it.
    fn on_passivate(&self, _address: &str, _connection: &mut Self::Connection) -> bool {
        false
    }
}
