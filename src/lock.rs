//! Named table locks.
//!
//! Metadata mutations on a base table are serialized through two named
//! locks, taken in a fixed order: [`LockKind::Metadata`] then
//! [`LockKind::DropTable`]. The lock primitive itself is supplied by a
//! [`LockProvider`]; wait and timeout policy belongs to the provider.
//!
//! [`TableLockSet`] holds the acquired leases, unwinds partial acquisitions,
//! and releases everything it still holds when dropped.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::catalog::TableIdentity;
use crate::error::RollupError;
use crate::hash;

/// The named locks guarding a base table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    Metadata,
    DropTable,
}

impl LockKind {
    /// Acquisition order for metadata mutations.
    pub const MUTATION_ORDER: [LockKind; 2] = [LockKind::Metadata, LockKind::DropTable];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Metadata => "metadata",
            LockKind::DropTable => "drop_table",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A held lease on one named lock.
pub trait TableLock: Send {
    fn kind(&self) -> LockKind;

    /// Release the lease. Returns `false` if the release failed; callers log
    /// and carry on.
    fn release(&mut self) -> bool;
}

/// Hands out named locks on tables.
pub trait LockProvider {
    fn acquire(
        &self,
        table: &TableIdentity,
        kind: LockKind,
    ) -> Result<Box<dyn TableLock>, RollupError>;
}

// ── Lock set ───────────────────────────────────────────────────────────────

/// Leases acquired for one mutation, in acquisition order.
pub struct TableLockSet {
    table: TableIdentity,
    held: Vec<Box<dyn TableLock>>,
}

impl TableLockSet {
    /// Acquire `kinds` in order. If any acquisition fails, the leases taken
    /// so far are released in reverse order and the error is returned as
    /// [`RollupError::LockAcquisition`].
    pub fn acquire(
        provider: &dyn LockProvider,
        table: &TableIdentity,
        kinds: &[LockKind],
    ) -> Result<Self, RollupError> {
        let mut set = Self {
            table: table.clone(),
            held: Vec::with_capacity(kinds.len()),
        };
        for kind in kinds {
            match provider.acquire(table, *kind) {
                Ok(lease) => set.held.push(lease),
                Err(e) => {
                    set.release_all();
                    return Err(match e {
                        RollupError::LockAcquisition(_) => e,
                        other => RollupError::LockAcquisition(format!(
                            "{kind} lock on {table}: {other}"
                        )),
                    });
                }
            }
        }
        Ok(set)
    }

    /// Kinds currently held, in acquisition order.
    pub fn held_kinds(&self) -> Vec<LockKind> {
        self.held.iter().map(|l| l.kind()).collect()
    }

    /// Release every held lease, newest first. A failed release is logged
    /// and never escalated. Returns whether all releases succeeded.
    pub fn release_all(&mut self) -> bool {
        let mut all_ok = true;
        while let Some(mut lease) = self.held.pop() {
            if !lease.release() {
                all_ok = false;
                tracing::warn!(
                    table = %self.table,
                    lock = %lease.kind(),
                    "failed to release table lock"
                );
            }
        }
        all_ok
    }
}

impl Drop for TableLockSet {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.release_all();
        }
    }
}

impl fmt::Debug for TableLockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLockSet")
            .field("table", &self.table)
            .field("held", &self.held_kinds())
            .finish()
    }
}

// ── In-memory provider ─────────────────────────────────────────────────────

/// Non-blocking try-lock provider keyed by [`hash::lock_key`].
///
/// Mirrors advisory-lock semantics: a key is either free or held, and a
/// second acquisition of a held key fails immediately.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockManager {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, table: &TableIdentity, kind: LockKind) -> bool {
        let key = hash::lock_key(&table.qualified_name(), kind.as_str());
        self.held
            .lock()
            .map(|held| held.contains(&key))
            .unwrap_or(false)
    }

    /// Number of keys currently held across all tables.
    pub fn held_count(&self) -> usize {
        self.held.lock().map(|held| held.len()).unwrap_or(0)
    }
}

impl LockProvider for InMemoryLockManager {
    fn acquire(
        &self,
        table: &TableIdentity,
        kind: LockKind,
    ) -> Result<Box<dyn TableLock>, RollupError> {
        let key = hash::lock_key(&table.qualified_name(), kind.as_str());
        let mut held = self
            .held
            .lock()
            .map_err(|_| RollupError::InternalError("lock table poisoned".into()))?;
        if !held.insert(key) {
            return Err(RollupError::LockAcquisition(format!(
                "{kind} lock on {table} is held by another session"
            )));
        }
        tracing::debug!(table = %table, lock = %kind, key, "acquired table lock");
        Ok(Box::new(InMemoryLease {
            held: Arc::clone(&self.held),
            key,
            kind,
            released: false,
        }))
    }
}

struct InMemoryLease {
    held: Arc<Mutex<HashSet<i64>>>,
    key: i64,
    kind: LockKind,
    released: bool,
}

impl TableLock for InMemoryLease {
    fn kind(&self) -> LockKind {
        self.kind
    }

    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        match self.held.lock() {
            Ok(mut held) => held.remove(&self.key),
            Err(_) => false,
        }
    }
}

impl Drop for InMemoryLease {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}
