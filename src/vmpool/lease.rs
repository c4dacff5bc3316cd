//! RAII lease over a pooled interpreter.
//!
//! Grounded on `pool::connection_pool::PooledConnectionGuard`'s `Drop`
//! impl in the teacher crate: the guard owns the resource for its scope
//! and unconditionally returns it to the pool on every exit path (normal
//! return, early return, panic unwind).

use mlua::Lua;

use super::{PooledVm, VmPool};

/// Unique, non-copyable handle owning one pooled interpreter. Dropping it
/// returns the interpreter to the pool (or drops it, if unhealthy or the
/// pool is stopping).
pub struct Lease {
    pool: VmPool,
    vm: Option<PooledVm>,
}

impl Lease {
    pub(crate) fn new(pool: VmPool, vm: PooledVm) -> Self {
        Self { pool, vm: Some(vm) }
    }

    pub fn lua(&self) -> &Lua {
        &self
            .vm
            .as_ref()
            .expect("lease vm taken before drop")
            .lua
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(vm) = self.vm.take() {
            self.pool.return_vm(vm);
        }
    }
}
