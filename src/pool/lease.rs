use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::connection::Connection;
use crate::types::LeaseIntent;

use super::PoolInner;

const LEASE_INVARIANT: &str = "connection is present until the lease is dropped";

/// Exclusive use of one pooled connection. Dropping the lease returns the connection;
/// an open transaction is rolled back first.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    intent: LeaseIntent,
}

impl PooledConnection {
    pub(super) fn new(conn: Connection, pool: Arc<PoolInner>, intent: LeaseIntent) -> Self {
        Self {
            conn: Some(conn),
            pool,
            intent,
        }
    }

    #[must_use]
    pub fn intent(&self) -> LeaseIntent {
        self.intent
    }

    /// Return the connection to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect(LEASE_INVARIANT)
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect(LEASE_INVARIANT)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("intent", &self.intent)
            .finish()
    }
}
