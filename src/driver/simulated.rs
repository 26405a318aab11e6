//! In-memory database used by the demo agent and the scenario tests.
//!
//! Databases live on a [`SimulatedNetwork`] so a standby can stream from
//! its upstream: a receiving standby's LSN follows the upstream's LSN.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

use crate::driver::{DatabaseDriver, DriverError, DriverResult, NodeAddress};
use crate::state::Lsn;

type Registry = DashMap<NodeAddress, Arc<SimulatedDatabase>>;

/// Set of simulated databases that can reach each other.
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    databases: Arc<Registry>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or return) the database listening on `address`.
    pub fn spawn(&self, address: NodeAddress) -> Arc<SimulatedDatabase> {
        self.databases
            .entry(address.clone())
            .or_insert_with(|| {
                Arc::new(SimulatedDatabase {
                    address,
                    network: Arc::downgrade(&self.databases),
                    inner: Mutex::new(Inner::default()),
                })
            })
            .value()
            .clone()
    }

    pub fn get(&self, address: &NodeAddress) -> Option<Arc<SimulatedDatabase>> {
        self.databases.get(address).map(|db| db.value().clone())
    }
}

#[derive(Debug)]
struct Inner {
    running: bool,
    in_recovery: bool,
    demoted: bool,
    lsn: Lsn,
    timeline: u32,
    source: Option<NodeAddress>,
    receiving: bool,
    synchronous_standby_names: String,
    start_fails: bool,
    failing: HashSet<&'static str>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            running: true,
            in_recovery: false,
            demoted: false,
            lsn: Lsn(0x0100_0000),
            timeline: 1,
            source: None,
            receiving: false,
            synchronous_standby_names: String::new(),
            start_fails: false,
            failing: HashSet::new(),
        }
    }
}

impl Inner {
    fn check(&self, operation: &'static str) -> DriverResult<()> {
        if self.failing.contains(operation) {
            return Err(DriverError::Rejected(format!("injected failure in {operation}")));
        }
        if !self.running {
            return Err(DriverError::NotRunning);
        }
        Ok(())
    }
}

/// A database that only exists in memory.
pub struct SimulatedDatabase {
    address: NodeAddress,
    network: Weak<Registry>,
    inner: Mutex<Inner>,
}

impl SimulatedDatabase {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Apply a write of `bytes` and return the new LSN.
    /// Fails unless the database is running and accepts writes.
    pub fn write(&self, bytes: u64) -> DriverResult<Lsn> {
        let mut inner = self.inner.lock();
        if !inner.running {
            return Err(DriverError::NotRunning);
        }
        if inner.in_recovery || inner.demoted {
            return Err(DriverError::Rejected(
                "cannot execute a write in a read-only transaction".to_string(),
            ));
        }
        inner.lsn = Lsn(inner.lsn.0 + bytes);
        Ok(inner.lsn)
    }

    /// Stop the process, as a crash would.
    pub fn crash(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        inner.receiving = false;
    }

    /// Keep `ensure_running` from bringing the database back.
    pub fn set_start_fails(&self, fails: bool) {
        self.inner.lock().start_fails = fails;
    }

    /// Make `operation` fail until cleared. Names: `promote`, `demote`,
    /// `start_replication`, `stop_replication`, `apply_settings`.
    pub fn set_failing(&self, operation: &'static str, failing: bool) {
        let mut inner = self.inner.lock();
        if failing {
            inner.failing.insert(operation);
        } else {
            inner.failing.remove(operation);
        }
    }

    pub fn accepts_writes(&self) -> bool {
        let inner = self.inner.lock();
        inner.running && !inner.in_recovery && !inner.demoted
    }

    pub fn is_demoted(&self) -> bool {
        self.inner.lock().demoted
    }

    pub fn synchronous_standby_names(&self) -> String {
        self.inner.lock().synchronous_standby_names.clone()
    }

    pub fn lsn(&self) -> Lsn {
        self.catch_up();
        self.inner.lock().lsn
    }

    fn upstream(&self, address: &NodeAddress) -> Option<Arc<SimulatedDatabase>> {
        let network = self.network.upgrade()?;
        let db = network.get(address)?.value().clone();
        Some(db)
    }

    /// Upstream position and timeline, when it is up.
    fn upstream_position(&self, address: &NodeAddress) -> Option<(Lsn, u32)> {
        let upstream = self.upstream(address)?;
        let inner = upstream.inner.lock();
        inner.running.then_some((inner.lsn, inner.timeline))
    }

    /// Pull WAL from the upstream. Locks are never held across databases.
    fn catch_up(&self) {
        let source = {
            let inner = self.inner.lock();
            if !(inner.running && inner.receiving) {
                return;
            }
            inner.source.clone()
        };
        let Some(source) = source else {
            return;
        };
        if let Some((lsn, timeline)) = self.upstream_position(&source) {
            let mut inner = self.inner.lock();
            if inner.receiving && inner.lsn < lsn {
                inner.lsn = lsn;
                inner.timeline = timeline;
            }
        }
    }
}

#[async_trait]
impl DatabaseDriver for SimulatedDatabase {
    async fn is_running(&self) -> DriverResult<bool> {
        Ok(self.inner.lock().running)
    }

    async fn ensure_running(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if inner.running {
            return Ok(());
        }
        if inner.start_fails {
            return Err(DriverError::Rejected("database failed to start".to_string()));
        }
        inner.running = true;
        // A restarted standby resumes streaming.
        inner.receiving = inner.in_recovery && !inner.demoted && inner.source.is_some();
        Ok(())
    }

    async fn current_lsn(&self) -> DriverResult<Lsn> {
        self.catch_up();
        let inner = self.inner.lock();
        inner.check("current_lsn")?;
        Ok(inner.lsn)
    }

    async fn timeline(&self) -> DriverResult<u32> {
        let inner = self.inner.lock();
        inner.check("timeline")?;
        Ok(inner.timeline)
    }

    async fn is_in_recovery(&self) -> DriverResult<bool> {
        let inner = self.inner.lock();
        inner.check("is_in_recovery")?;
        Ok(inner.in_recovery)
    }

    async fn replication_source(&self) -> DriverResult<Option<NodeAddress>> {
        let inner = self.inner.lock();
        inner.check("replication_source")?;
        Ok(if inner.receiving { inner.source.clone() } else { None })
    }

    async fn start_replication_from(&self, primary: &NodeAddress) -> DriverResult<()> {
        self.inner.lock().check("start_replication")?;
        if primary == &self.address {
            return Err(DriverError::Rejected("cannot replicate from itself".to_string()));
        }
        // Rewind onto the upstream history, or fail when it is unreachable.
        let (lsn, timeline) = self
            .upstream_position(primary)
            .ok_or_else(|| DriverError::Rejected(format!("upstream {primary} is not reachable")))?;

        let mut inner = self.inner.lock();
        inner.in_recovery = true;
        inner.demoted = false;
        inner.receiving = true;
        inner.source = Some(primary.clone());
        inner.lsn = lsn;
        inner.timeline = timeline;
        Ok(())
    }

    async fn stop_replication(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        inner.check("stop_replication")?;
        inner.receiving = false;
        Ok(())
    }

    async fn promote(&self) -> DriverResult<()> {
        self.catch_up();
        let mut inner = self.inner.lock();
        inner.check("promote")?;
        if !inner.in_recovery && !inner.demoted {
            return Ok(());
        }
        inner.in_recovery = false;
        inner.demoted = false;
        inner.receiving = false;
        inner.source = None;
        inner.timeline += 1;
        Ok(())
    }

    async fn demote(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        if inner.failing.contains("demote") {
            return Err(DriverError::Rejected("injected failure in demote".to_string()));
        }
        // Comes back as a standby without an upstream.
        inner.demoted = true;
        inner.in_recovery = true;
        inner.receiving = false;
        Ok(())
    }

    async fn apply_settings(&self, synchronous_standby_names: &str) -> DriverResult<()> {
        let mut inner = self.inner.lock();
        inner.check("apply_settings")?;
        inner.synchronous_standby_names = synchronous_standby_names.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Arc<SimulatedDatabase>, Arc<SimulatedDatabase>) {
        let network = SimulatedNetwork::new();
        let primary = network.spawn(NodeAddress::new("db1", 5432));
        let standby = network.spawn(NodeAddress::new("db2", 5432));
        (primary, standby)
    }

    #[tokio::test]
    async fn standby_follows_primary_and_rejects_writes() {
        let (primary, standby) = pair();
        standby.start_replication_from(primary.address()).await.unwrap();

        let written = primary.write(4096).unwrap();
        assert_eq!(standby.current_lsn().await.unwrap(), written);
        assert!(standby.is_in_recovery().await.unwrap());
        assert!(matches!(standby.write(1), Err(DriverError::Rejected(_))));
    }

    #[tokio::test]
    async fn promotion_bumps_timeline_and_is_idempotent() {
        let (primary, standby) = pair();
        standby.start_replication_from(primary.address()).await.unwrap();

        standby.promote().await.unwrap();
        standby.promote().await.unwrap();
        assert_eq!(standby.timeline().await.unwrap(), 2);
        assert!(standby.accepts_writes());
        assert_eq!(standby.replication_source().await.unwrap(), None);
    }

    #[tokio::test]
    async fn demoted_primary_rejoins_on_new_timeline() {
        let (primary, standby) = pair();
        standby.start_replication_from(primary.address()).await.unwrap();
        standby.promote().await.unwrap();

        primary.demote().await.unwrap();
        assert!(primary.write(1).is_err());

        primary.start_replication_from(standby.address()).await.unwrap();
        standby.write(100).unwrap();
        assert_eq!(primary.current_lsn().await.unwrap(), standby.lsn());
        assert_eq!(primary.timeline().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn crashed_database_stays_down_when_start_fails() {
        let (primary, _) = pair();
        primary.crash();
        primary.set_start_fails(true);
        assert!(primary.ensure_running().await.is_err());
        assert!(!primary.is_running().await.unwrap());

        primary.set_start_fails(false);
        primary.ensure_running().await.unwrap();
        assert!(primary.accepts_writes());
    }

    #[tokio::test]
    async fn replication_needs_a_running_upstream() {
        let (primary, standby) = pair();
        primary.crash();
        assert!(standby.start_replication_from(primary.address()).await.is_err());
    }
}
