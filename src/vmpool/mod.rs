//! Scripting VM Pool: bounded, elastic pool of isolated Lua interpreters.
//!
//! Grounded on `shield::script::LuaVMPool`/`PooledLuaVM`
//! (`original_source/src/script/lua_vm_pool.cpp`): acquire expands the
//! pool before giving up, VMs found unhealthy on acquire get one reset
//! attempt before being dropped, release drops unhealthy VMs outright,
//! and a background task reclaims idle VMs without going below
//! `min_size`.

pub mod lease;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::Lua;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::config::LuaVmPoolConfig;
use crate::error::Result;

pub use lease::Lease;

pub(crate) struct PooledVm {
    pub(crate) lua: Lua,
    last_used: Instant,
}

struct PoolState {
    available: Vec<PooledVm>,
    total: usize,
    stopping: bool,
}

#[derive(Default)]
struct AtomicStats {
    total_acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
    total_wait_ms: AtomicU64,
    wait_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatsSnapshot {
    pub total_vms: usize,
    pub available_vms: usize,
    pub active_vms: usize,
    pub total_acquisitions: u64,
    pub failed_acquisitions: u64,
    pub average_wait_time_ms: f64,
}

struct Inner {
    state: Mutex<PoolState>,
    notify: Notify,
    stats: AtomicStats,
    config: LuaVmPoolConfig,
    preloaded_paths: Mutex<Vec<PathBuf>>,
    preloaded_content: Mutex<Vec<(String, String)>>,
}

/// Handle to the pool. Cheap to clone — shares the underlying state.
#[derive(Clone)]
pub struct VmPool {
    inner: Arc<Inner>,
}

impl VmPool {
    pub async fn new(config: LuaVmPoolConfig) -> Result<Self> {
        config.validate()?;
        let initial_paths = config
            .script_paths
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>();

        let inner = Arc::new(Inner {
            state: Mutex::new(PoolState {
                available: Vec::new(),
                total: 0,
                stopping: false,
            }),
            notify: Notify::new(),
            stats: AtomicStats::default(),
            preloaded_paths: Mutex::new(initial_paths),
            preloaded_content: Mutex::new(Vec::new()),
            config,
        });
        let pool = Self { inner };

        for _ in 0..pool.inner.config.initial_size {
            let vm = pool.create_vm()?;
            let mut state = pool.inner.state.lock();
            state.total += 1;
            state.available.push(vm);
        }

        pool.spawn_cleanup_task();
        Ok(pool)
    }

    fn create_vm(&self) -> Result<PooledVm> {
        let lua = Lua::new();
        if self.inner.config.preload_scripts {
            for path in self.inner.preloaded_paths.lock().iter() {
                let src = std::fs::read_to_string(path)?;
                lua.load(&src)
                    .set_name(&path.to_string_lossy())
                    .exec()
                    .map_err(crate::error::Error::from)?;
            }
            for (name, source) in self.inner.preloaded_content.lock().iter() {
                lua.load(source.as_str())
                    .set_name(name)
                    .exec()
                    .map_err(crate::error::Error::from)?;
            }
        }
        Ok(PooledVm {
            lua,
            last_used: Instant::now(),
        })
    }

    fn is_healthy(vm: &PooledVm) -> bool {
        vm.lua
            .load("return 1")
            .eval::<i64>()
            .map(|v| v == 1)
            .unwrap_or(false)
    }

    /// Records a path whose contents get executed once on each newly
    /// created VM, before it becomes available.
    pub fn preload_script(&self, path: impl Into<PathBuf>) {
        self.inner.preloaded_paths.lock().push(path.into());
    }

    pub fn preload_script_content(&self, name: impl Into<String>, source: impl Into<String>) {
        self.inner
            .preloaded_content
            .lock()
            .push((name.into(), source.into()));
    }

    pub fn clear_preloaded_scripts(&self) {
        self.inner.preloaded_paths.lock().clear();
        self.inner.preloaded_content.lock().clear();
    }

    pub async fn acquire(&self, timeout: Duration) -> Option<Lease> {
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            enum Step {
                Got(PooledVm),
                Create,
                Stopped,
                Wait,
            }

            let step = {
                let mut state = self.inner.state.lock();
                if state.stopping {
                    Step::Stopped
                } else if let Some(vm) = state.available.pop() {
                    Step::Got(vm)
                } else if state.total < self.inner.config.max_size {
                    state.total += 1;
                    Step::Create
                } else {
                    Step::Wait
                }
            };

            let vm = match step {
                Step::Stopped => {
                    self.record_failed_acquisition();
                    return None;
                }
                Step::Got(vm) => vm,
                Step::Create => match self.create_vm() {
                    Ok(vm) => vm,
                    Err(e) => {
                        error!("failed to create vm while expanding pool: {e}");
                        let mut state = self.inner.state.lock();
                        state.total = state.total.saturating_sub(1);
                        drop(state);
                        self.record_failed_acquisition();
                        return None;
                    }
                },
                Step::Wait => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.record_failed_acquisition();
                        return None;
                    }
                    let notified = self.inner.notify.notified();
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        self.record_failed_acquisition();
                        return None;
                    }
                    continue;
                }
            };

            let vm = if Self::is_healthy(&vm) {
                vm
            } else {
                warn!("vm found unhealthy on acquire, attempting one reset");
                match self.create_vm() {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        error!("vm reset failed, dropping: {e}");
                        let mut state = self.inner.state.lock();
                        state.total = state.total.saturating_sub(1);
                        drop(state);
                        continue;
                    }
                }
            };

            let wait_ms = start.elapsed().as_millis() as u64;
            self.inner
                .stats
                .total_acquisitions
                .fetch_add(1, Ordering::Relaxed);
            self.inner
                .stats
                .total_wait_ms
                .fetch_add(wait_ms, Ordering::Relaxed);
            self.inner
                .stats
                .wait_samples
                .fetch_add(1, Ordering::Relaxed);

            return Some(Lease::new(self.clone(), vm));
        }
    }

    fn record_failed_acquisition(&self) {
        self.inner
            .stats
            .failed_acquisitions
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn return_vm(&self, mut vm: PooledVm) {
        let mut state = self.inner.state.lock();
        if state.stopping || !Self::is_healthy(&vm) {
            state.total = state.total.saturating_sub(1);
            return;
        }
        vm.last_used = Instant::now();
        state.available.push(vm);
        drop(state);
        self.inner.notify.notify_one();
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        let state = self.inner.state.lock();
        let total = state.total;
        let available = state.available.len();
        drop(state);
        let samples = self.inner.stats.wait_samples.load(Ordering::Relaxed);
        let total_wait = self.inner.stats.total_wait_ms.load(Ordering::Relaxed);
        PoolStatsSnapshot {
            total_vms: total,
            available_vms: available,
            active_vms: total.saturating_sub(available),
            total_acquisitions: self.inner.stats.total_acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.inner.stats.failed_acquisitions.load(Ordering::Relaxed),
            average_wait_time_ms: if samples == 0 {
                0.0
            } else {
                total_wait as f64 / samples as f64
            },
        }
    }

    fn spawn_cleanup_task(&self) {
        let pool = self.clone();
        let idle_timeout = Duration::from_millis(pool.inner.config.idle_timeout_ms);
        let min_size = pool.inner.config.min_size;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let stopping = {
                    let state = pool.inner.state.lock();
                    state.stopping
                };
                if stopping {
                    break;
                }
                pool.cleanup_idle(idle_timeout, min_size);
            }
        });
    }

    fn cleanup_idle(&self, idle_timeout: Duration, min_size: usize) {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let mut kept = Vec::with_capacity(state.available.len());
        let mut dropped = 0usize;
        for vm in state.available.drain(..) {
            let can_drop = state.total - dropped > min_size
                && now.duration_since(vm.last_used) > idle_timeout;
            if can_drop {
                dropped += 1;
            } else {
                kept.push(vm);
            }
        }
        state.available = kept;
        state.total -= dropped;
        if dropped > 0 {
            debug!("cleanup_idle: reclaimed {dropped} idle vm(s), total now {}", state.total);
        }
    }

    /// Wakes every waiter with no VM to give them and drops the pool.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.stopping = true;
        state.available.clear();
        state.total = 0;
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: usize, min: usize, max: usize) -> LuaVmPoolConfig {
        LuaVmPoolConfig {
            initial_size: initial,
            min_size: min,
            max_size: max,
            idle_timeout_ms: 60_000,
            acquire_timeout_ms: 1_000,
            preload_scripts: false,
            script_paths: Vec::new(),
        }
    }

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let pool = VmPool::new(config(1, 1, 2)).await.unwrap();
        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let v: i64 = lease.lua().load("return 41 + 1").eval().unwrap();
        assert_eq!(v, 42);
        drop(lease);
        assert_eq!(pool.stats().available_vms, 1);
    }

    #[tokio::test]
    async fn exhaustion_times_out_then_recovers() {
        let pool = VmPool::new(config(2, 2, 4)).await.unwrap();
        let mut leases: Vec<_> = futures_join_all(&pool, 4).await;
        assert_eq!(leases.len(), 4);

        let fifth = pool.acquire(Duration::from_millis(50)).await;
        assert!(fifth.is_none());
        assert_eq!(pool.stats().failed_acquisitions, 1);

        drop(leases.remove(0));
        let sixth = pool.acquire(Duration::from_millis(200)).await;
        assert!(sixth.is_some());
    }

    async fn futures_join_all(pool: &VmPool, n: usize) -> Vec<Lease> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(pool.acquire(Duration::from_millis(100)).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn pool_never_shrinks_below_min_size() {
        let pool = VmPool::new(config(2, 2, 4)).await.unwrap();
        pool.cleanup_idle(Duration::from_millis(0), 2);
        assert_eq!(pool.stats().total_vms, 2);
    }
}
