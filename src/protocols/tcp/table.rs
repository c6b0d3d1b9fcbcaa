// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The connection table.
//!
//! Maps the (local, remote) address pair of every live connection to its
//! endpoint. The table's lock covers bookkeeping only (lookup, insertion,
//! removal); no segment is ever built or transmitted while it is held, so the
//! inbound path, the background driver, and application calls never serialize
//! against each other here for longer than a hash-map operation.

//==============================================================================
// Imports
//==============================================================================

use crate::{protocols::tcp::endpoint::Endpoint, runtime::fail::Fail};
use ::libc::EADDRINUSE;
use ::std::{
    collections::HashMap,
    net::SocketAddrV4,
    sync::{Arc, Mutex, MutexGuard},
};

//==============================================================================
// Structures
//==============================================================================

/// The set of live connections, keyed by 4-tuple.
#[derive(Default)]
pub(crate) struct EndpointTable {
    endpoints: Mutex<HashMap<(SocketAddrV4, SocketAddrV4), Arc<Endpoint>>>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl EndpointTable {
    /// Looks up the endpoint owning the given 4-tuple.
    pub fn lookup(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<Arc<Endpoint>> {
        let endpoints: MutexGuard<HashMap<(SocketAddrV4, SocketAddrV4), Arc<Endpoint>>> =
            self.endpoints.lock().unwrap();
        endpoints.get(&(local, remote)).cloned()
    }

    /// Registers a new endpoint. Fails if its 4-tuple is already taken.
    pub fn insert(&self, endpoint: Arc<Endpoint>) -> Result<(), Fail> {
        let key: (SocketAddrV4, SocketAddrV4) = (endpoint.local(), endpoint.remote());
        let mut endpoints: MutexGuard<HashMap<(SocketAddrV4, SocketAddrV4), Arc<Endpoint>>> =
            self.endpoints.lock().unwrap();
        if endpoints.contains_key(&key) {
            return Err(Fail::new(EADDRINUSE, "address pair already in use"));
        }
        endpoints.insert(key, endpoint);
        Ok(())
    }

    /// Checks whether a 4-tuple is taken, without touching the endpoint.
    pub fn contains(&self, local: SocketAddrV4, remote: SocketAddrV4) -> bool {
        self.endpoints.lock().unwrap().contains_key(&(local, remote))
    }

    /// Drops an endpoint's table entry. The endpoint itself lives on while
    /// socket handles hold it, but no further inbound segment reaches it.
    pub fn remove(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<Arc<Endpoint>> {
        self.endpoints.lock().unwrap().remove(&(local, remote))
    }

    /// Clones out the current set of endpoints. The driver iterates over the
    /// snapshot with the table unlocked, so timer dispatch and transmission
    /// never hold the table lock.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.lock().unwrap().values().cloned().collect()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::EndpointTable;
    use crate::{
        protocols::tcp::{endpoint::Endpoint, SeqNumber},
        runtime::network::config::TcpConfig,
    };
    use ::anyhow::Result;
    use ::std::{
        net::{Ipv4Addr, SocketAddrV4},
        sync::Arc,
        time::Instant,
    };

    fn endpoint(local_port: u16, remote_port: u16) -> Result<Arc<Endpoint>> {
        let local: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), local_port);
        let remote: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), remote_port);
        let config: TcpConfig = TcpConfig::default();
        match Endpoint::new(local, remote, SeqNumber::from(0), 1450, false, &config, Instant::now()) {
            Ok(endpoint) => Ok(Arc::new(endpoint)),
            Err(e) => anyhow::bail!("endpoint creation failed: {:?}", e),
        }
    }

    /// Tests insert/lookup/remove round and the duplicate-key failure.
    #[test]
    fn insert_lookup_remove() -> Result<()> {
        let table: EndpointTable = EndpointTable::default();
        let endpoint: Arc<Endpoint> = endpoint(49152, 80)?;
        let (local, remote): (SocketAddrV4, SocketAddrV4) = (endpoint.local(), endpoint.remote());

        table.insert(endpoint.clone())?;
        anyhow::ensure!(table.contains(local, remote));
        anyhow::ensure!(table.lookup(local, remote).is_some());

        // Same 4-tuple again must be refused.
        anyhow::ensure!(table.insert(endpoint).is_err());

        anyhow::ensure!(table.remove(local, remote).is_some());
        anyhow::ensure!(table.lookup(local, remote).is_none());
        Ok(())
    }

    /// Tests that a snapshot contains every live endpoint.
    #[test]
    fn snapshot_covers_table() -> Result<()> {
        let table: EndpointTable = EndpointTable::default();
        table.insert(endpoint(49152, 80)?)?;
        table.insert(endpoint(49153, 80)?)?;
        anyhow::ensure!(table.snapshot().len() == 2);
        Ok(())
    }
}
