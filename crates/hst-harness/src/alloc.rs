//! Port and CPU allocation shared by every suite in the runner process.
//!
//! Ports are partitioned into fixed-width ranges, one per suite slot. Slot
//! numbers are global across runner processes: process `p` owns slots
//! `p * slots_per_process .. (p + 1) * slots_per_process`, so concurrent
//! runners configured with distinct `process_index` values never overlap.
//! CPU cores are split the same way and handed out as RAII leases. A
//! request that cannot be met yet waits for leases to come back; a request
//! larger than the whole pool gets shared, unleased cores instead.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::Resources;
use crate::error::{HarnessError, HarnessResult};

#[derive(Debug)]
struct Inner {
    resources: Resources,
    free_slots: Mutex<BTreeSet<u16>>,
    cores: Vec<usize>,
    free_cpus: Mutex<BTreeSet<usize>>,
    cpus_released: Notify,
    live_leases: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct ResourcePool {
    inner: Arc<Inner>,
}

impl ResourcePool {
    /// Pool over this process's share of the host's cores.
    pub fn new(resources: Resources) -> Self {
        let total = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let per_process = (total / resources.parallel_processes as usize).max(1);
        let first = (resources.process_index as usize * per_process) % total;
        let cores = (first..first + per_process).map(|c| c % total).collect();
        Self::with_cores(resources, cores)
    }

    /// Pool over an explicit core list.
    pub fn with_cores(resources: Resources, cores: Vec<usize>) -> Self {
        let first_slot = resources.process_index * resources.slots_per_process;
        let free_slots = (first_slot..first_slot + resources.slots_per_process).collect();
        let free_cpus: BTreeSet<usize> = cores.into_iter().collect();
        Self {
            inner: Arc::new(Inner {
                resources,
                free_slots: Mutex::new(free_slots),
                cores: free_cpus.iter().copied().collect(),
                free_cpus: Mutex::new(free_cpus),
                cpus_released: Notify::new(),
                live_leases: AtomicUsize::new(0),
            }),
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.inner.resources
    }

    /// Claim the lowest free suite slot.
    pub fn claim_slot(&self) -> HarnessResult<SuiteSlot> {
        let slot = {
            let mut free = lock(&self.inner.free_slots);
            let slot = free.iter().next().copied().ok_or_else(|| {
                HarnessError::Resource(format!(
                    "all {} suite slots in use",
                    self.inner.resources.slots_per_process
                ))
            })?;
            free.remove(&slot);
            slot
        };
        self.inner.live_leases.fetch_add(1, Ordering::SeqCst);
        let r = &self.inner.resources;
        let first_port = r.port_base as u32 + slot as u32 * r.ports_per_slot as u32;
        debug!(slot, first_port, "suite slot claimed");
        Ok(SuiteSlot {
            pool: self.inner.clone(),
            slot,
            next_port: first_port,
            end_port: (first_port + r.ports_per_slot as u32).min(u16::MAX as u32 + 1),
        })
    }

    /// Lease `n` cores if that many are free right now.
    pub fn allocate_cpus(&self, n: usize) -> HarnessResult<CpuSet> {
        if n == 0 {
            return Err(HarnessError::Resource("requested 0 cpus".into()));
        }
        self.try_lease(&[n])
            .and_then(|mut sets| sets.pop())
            .ok_or_else(|| {
                HarnessError::Resource(format!(
                    "requested {} cpus, {} free",
                    n,
                    lock(&self.inner.free_cpus).len()
                ))
            })
    }

    /// Lease one set per entry of `counts` in a single step, disjoint from
    /// each other and from every live lease.
    ///
    /// Waits while too few cores are free; callers bound the wait with
    /// their setup budget. Nothing is held while waiting. If the pool is
    /// smaller than the total request the sets share the pool's cores and
    /// hold no lease.
    pub async fn acquire_cpu_sets(&self, counts: &[usize]) -> HarnessResult<Vec<CpuSet>> {
        if counts.contains(&0) {
            return Err(HarnessError::Resource("requested 0 cpus".into()));
        }
        let total: usize = counts.iter().sum();
        if total > self.inner.cores.len() {
            return self.shared_sets(counts, total);
        }
        loop {
            let released = self.inner.cpus_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if let Some(sets) = self.try_lease(counts) {
                return Ok(sets);
            }
            debug!(requested = total, "waiting for cpus");
            released.await;
        }
    }

    fn try_lease(&self, counts: &[usize]) -> Option<Vec<CpuSet>> {
        let total: usize = counts.iter().sum();
        let picked: Vec<Vec<usize>> = {
            let mut free = lock(&self.inner.free_cpus);
            if free.len() < total {
                return None;
            }
            counts
                .iter()
                .map(|&n| {
                    let cores: Vec<usize> = free.iter().take(n).copied().collect();
                    for c in &cores {
                        free.remove(c);
                    }
                    cores
                })
                .collect()
        };
        self.inner
            .live_leases
            .fetch_add(picked.len(), Ordering::SeqCst);
        debug!(cores = ?picked, "cpus allocated");
        Some(
            picked
                .into_iter()
                .map(|cores| CpuSet {
                    pool: Some(self.inner.clone()),
                    cores,
                })
                .collect(),
        )
    }

    fn shared_sets(&self, counts: &[usize], total: usize) -> HarnessResult<Vec<CpuSet>> {
        let all = &self.inner.cores;
        if all.is_empty() {
            return Err(HarnessError::Resource("cpu pool is empty".into()));
        }
        warn!(
            requested = total,
            cores = all.len(),
            "too few cores for exclusive cpu sets, sharing"
        );
        let mut next = 0;
        Ok(counts
            .iter()
            .map(|&n| {
                let cores = (0..n).map(|i| all[(next + i) % all.len()]).collect();
                next += n;
                CpuSet::unpinned(cores)
            })
            .collect())
    }

    /// Slot and CPU leases currently held.
    pub fn outstanding(&self) -> usize {
        self.inner.live_leases.load(Ordering::SeqCst)
    }
}

/// A suite's claim on one slot: its port range and address subnet.
#[derive(Debug)]
pub struct SuiteSlot {
    pool: Arc<Inner>,
    slot: u16,
    next_port: u32,
    end_port: u32,
}

impl SuiteSlot {
    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Next port in this slot's range. Never repeats while the slot is held.
    pub fn generate_port(&mut self) -> HarnessResult<u16> {
        if self.next_port >= self.end_port {
            return Err(HarnessError::Resource(format!(
                "port range of slot {} exhausted",
                self.slot
            )));
        }
        let port = self.next_port as u16;
        self.next_port += 1;
        Ok(port)
    }
}

impl Drop for SuiteSlot {
    fn drop(&mut self) {
        lock(&self.pool.free_slots).insert(self.slot);
        self.pool.live_leases.fetch_sub(1, Ordering::SeqCst);
        debug!(slot = self.slot, "suite slot released");
    }
}

/// Leased CPU cores; returned to the pool on drop.
#[derive(Debug)]
pub struct CpuSet {
    pool: Option<Arc<Inner>>,
    cores: Vec<usize>,
}

impl CpuSet {
    /// A set not backed by any pool; nothing is returned on drop.
    pub fn unpinned(cores: Vec<usize>) -> Self {
        Self { pool: None, cores }
    }

    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    pub fn main_core(&self) -> Option<usize> {
        self.cores.first().copied()
    }

    pub fn workers(&self) -> &[usize] {
        self.cores.get(1..).unwrap_or(&[])
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list: Vec<String> = self.cores.iter().map(|c| c.to_string()).collect();
        f.write_str(&list.join(","))
    }
}

impl Drop for CpuSet {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            lock(&pool.free_cpus).extend(self.cores.iter().copied());
            pool.live_leases.fetch_sub(1, Ordering::SeqCst);
            pool.cpus_released.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn pool(cores: usize) -> ResourcePool {
        ResourcePool::with_cores(Resources::default(), (0..cores).collect())
    }

    #[test]
    fn cpu_leases_are_disjoint_and_returned() {
        let p = pool(4);
        let a = p.allocate_cpus(2).unwrap();
        let b = p.allocate_cpus(2).unwrap();
        assert!(a.cores().iter().all(|c| !b.cores().contains(c)));
        assert!(p.allocate_cpus(1).is_err());
        assert_eq!(p.outstanding(), 2);
        drop(a);
        let c = p.allocate_cpus(2).unwrap();
        assert_eq!(c.cores(), &[0, 1]);
        assert_eq!(c.to_string(), "0,1");
        assert_eq!(c.main_core(), Some(0));
        assert_eq!(c.workers(), &[1]);
        drop(b);
        drop(c);
        assert_eq!(p.outstanding(), 0);
    }

    #[tokio::test]
    async fn acquire_waits_for_released_cores() {
        let p = pool(2);
        let held = p.allocate_cpus(2).unwrap();

        let waiter = tokio::spawn({
            let p = p.clone();
            async move { p.acquire_cpu_sets(&[1, 1]).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        let sets = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_ne!(sets[0].cores(), sets[1].cores());
        assert_eq!(p.outstanding(), 2);
        drop(sets);
        assert_eq!(p.outstanding(), 0);
    }

    #[tokio::test]
    async fn oversized_request_shares_cores_without_leasing() {
        let p = pool(1);
        let sets = p.acquire_cpu_sets(&[1, 1, 1]).await.unwrap();
        assert!(sets.iter().all(|s| s.cores() == [0]));
        assert_eq!(p.outstanding(), 0);
        assert!(p.acquire_cpu_sets(&[0]).await.is_err());
        let empty = ResourcePool::with_cores(Resources::default(), Vec::new());
        assert!(empty.acquire_cpu_sets(&[1]).await.is_err());
    }

    #[test]
    fn slots_partition_by_process_index() {
        let resources = Resources {
            process_index: 2,
            parallel_processes: 4,
            slots_per_process: 8,
            ..Resources::default()
        };
        let p = ResourcePool::with_cores(resources, vec![0]);
        let mut s = p.claim_slot().unwrap();
        assert_eq!(s.slot(), 16);
        assert_eq!(s.generate_port().unwrap(), 10000 + 16 * 100);
    }

    #[test]
    fn slot_port_range_exhausts() {
        let resources = Resources {
            ports_per_slot: 3,
            ..Resources::default()
        };
        let p = ResourcePool::with_cores(resources, vec![0]);
        let mut s = p.claim_slot().unwrap();
        for _ in 0..3 {
            s.generate_port().unwrap();
        }
        assert!(s.generate_port().is_err());
    }

    #[test]
    fn released_slot_is_reused() {
        let resources = Resources {
            slots_per_process: 1,
            ..Resources::default()
        };
        let p = ResourcePool::with_cores(resources, vec![0]);
        let s = p.claim_slot().unwrap();
        assert!(p.claim_slot().is_err());
        drop(s);
        assert!(p.claim_slot().is_ok());
    }

    proptest! {
        #[test]
        fn ports_unique_across_processes_and_slots(
            procs in 1u16..4,
            slots in 1u16..5,
            per_slot in 1u16..20,
        ) {
            let mut seen = HashSet::new();
            for idx in 0..procs {
                let resources = Resources {
                    process_index: idx,
                    parallel_processes: procs,
                    slots_per_process: slots,
                    ports_per_slot: per_slot,
                    ..Resources::default()
                };
                let p = ResourcePool::with_cores(resources, vec![0]);
                let mut held = Vec::new();
                for _ in 0..slots {
                    let mut s = p.claim_slot().unwrap();
                    while let Ok(port) = s.generate_port() {
                        prop_assert!(seen.insert(port), "port {} handed out twice", port);
                    }
                    held.push(s);
                }
            }
        }
    }
}
