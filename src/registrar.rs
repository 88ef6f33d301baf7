//! Transactional registration of rollup descriptors.
//!
//! Every mutation of a base table's metadata runs the same protocol:
//!
//! 1. acquire the `metadata` then `drop_table` locks on the base table;
//! 2. read the metadata document and take a checkpoint;
//! 3. check the mutation is legal (no duplicate name, child exists);
//! 4. write the document back and refresh caches;
//! 5. on any failure after step 1, compare the stored document with the
//!    checkpoint and restore it if it moved, then return the original error;
//! 6. release both locks, whatever happened.
//!
//! Registration checkpoints the child count and reverts by truncating to it.
//! That is only sound because the two locks make this the single writer of
//! the document for the duration of the window; it is not a general conflict
//! resolver.

use std::fmt;

use crate::catalog::{AggregateTableDescriptor, MetadataStore, ParentTableMetadata, TableIdentity};
use crate::error::{RollupError, malformed};
use crate::lock::{LockKind, LockProvider, TableLockSet};

/// Protocol states, recorded in order in a [`RegistrationReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    LocksAcquired,
    SchemaRead,
    DuplicateChecked,
    SchemaWritten,
    CacheRefreshed,
    Reverting,
    LocksReleased,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Idle => "IDLE",
            RegistrationState::LocksAcquired => "LOCKS_ACQUIRED",
            RegistrationState::SchemaRead => "SCHEMA_READ",
            RegistrationState::DuplicateChecked => "DUPLICATE_CHECKED",
            RegistrationState::SchemaWritten => "SCHEMA_WRITTEN",
            RegistrationState::CacheRefreshed => "CACHE_REFRESHED",
            RegistrationState::Reverting => "REVERTING",
            RegistrationState::LocksReleased => "LOCKS_RELEASED",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful register / unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    pub base: TableIdentity,
    pub child: String,
    /// Every state visited, starting at `Idle`.
    pub states: Vec<RegistrationState>,
    /// Number of children after the mutation.
    pub child_count: usize,
    /// False when a lock release failed (logged, not escalated).
    pub locks_released_cleanly: bool,
}

impl RegistrationReport {
    pub fn final_state(&self) -> RegistrationState {
        self.states
            .last()
            .copied()
            .unwrap_or(RegistrationState::Idle)
    }
}

/// What the revert step compares the stored document against.
#[derive(Debug)]
enum Checkpoint {
    /// Child count before an append.
    ChildCount(usize),
    /// Full child list before a removal.
    Children(Vec<AggregateTableDescriptor>),
}

/// Registers and unregisters child descriptors on base tables.
pub struct MetadataRegistrar<'a> {
    store: &'a dyn MetadataStore,
    locks: &'a dyn LockProvider,
}

impl<'a> MetadataRegistrar<'a> {
    pub fn new(store: &'a dyn MetadataStore, locks: &'a dyn LockProvider) -> Self {
        Self { store, locks }
    }

    /// Append `descriptor` to `base`'s metadata.
    ///
    /// Fails with [`RollupError::DuplicateDescriptor`] if a child with the
    /// same name (case-insensitive) exists, and with
    /// [`RollupError::MalformedSpecification`] if `base` is itself a rollup
    /// and the descriptor is not time-bucketed. Any failure leaves the stored
    /// child list as it was.
    pub fn register(
        &self,
        base: &TableIdentity,
        descriptor: AggregateTableDescriptor,
    ) -> Result<RegistrationReport, RollupError> {
        let child = descriptor.name.clone();
        self.run(base, &child, |metadata| {
            let checkpoint = Checkpoint::ChildCount(metadata.children.len());
            if metadata.is_child_table() && descriptor.granularity.is_none() {
                return Err((
                    checkpoint,
                    malformed(format!("pre-aggregation on pre-aggregated table {base}")),
                ));
            }
            if metadata.child(&descriptor.name).is_some() {
                return Err((
                    checkpoint,
                    RollupError::DuplicateDescriptor(format!(
                        "{} on table {base}",
                        descriptor.name
                    )),
                ));
            }
            metadata.children.push(descriptor);
            Ok(checkpoint)
        })
    }

    /// Remove the child named `name` from `base`'s metadata.
    pub fn unregister(
        &self,
        base: &TableIdentity,
        name: &str,
    ) -> Result<RegistrationReport, RollupError> {
        self.run(base, name, |metadata| {
            let checkpoint = Checkpoint::Children(metadata.children.clone());
            if let Err(e) = metadata.require_child(name) {
                return Err((checkpoint, e));
            }
            metadata.children.retain(|c| !c.has_name(name));
            Ok(checkpoint)
        })
    }

    /// Shared lock → read → mutate → write → refresh → (revert) → release.
    ///
    /// `mutate` returns the checkpoint taken from the freshly read document
    /// alongside either success or the reason the mutation is illegal.
    fn run<F>(
        &self,
        base: &TableIdentity,
        child: &str,
        mutate: F,
    ) -> Result<RegistrationReport, RollupError>
    where
        F: FnOnce(&mut ParentTableMetadata) -> Result<Checkpoint, (Checkpoint, RollupError)>,
    {
        let mut states = vec![RegistrationState::Idle];
        let mut locks = TableLockSet::acquire(self.locks, base, &LockKind::MUTATION_ORDER)?;
        states.push(RegistrationState::LocksAcquired);

        let mut checkpoint = None;
        let result = self.mutate_locked(base, mutate, &mut states, &mut checkpoint);

        if let Err(e) = &result {
            if let Some(checkpoint) = &checkpoint {
                states.push(RegistrationState::Reverting);
                self.revert(base, child, checkpoint, e);
            }
        }

        let released = locks.release_all();
        states.push(RegistrationState::LocksReleased);

        let child_count = result?;
        tracing::info!(
            base = %base,
            child,
            child_count,
            "rollup metadata updated"
        );
        Ok(RegistrationReport {
            base: base.clone(),
            child: child.to_string(),
            states,
            child_count,
            locks_released_cleanly: released,
        })
    }

    fn mutate_locked<F>(
        &self,
        base: &TableIdentity,
        mutate: F,
        states: &mut Vec<RegistrationState>,
        checkpoint: &mut Option<Checkpoint>,
    ) -> Result<usize, RollupError>
    where
        F: FnOnce(&mut ParentTableMetadata) -> Result<Checkpoint, (Checkpoint, RollupError)>,
    {
        let mut metadata = self.store.get_metadata(base)?;
        states.push(RegistrationState::SchemaRead);

        match mutate(&mut metadata) {
            Ok(cp) => *checkpoint = Some(cp),
            Err((cp, e)) => {
                *checkpoint = Some(cp);
                return Err(e);
            }
        }
        states.push(RegistrationState::DuplicateChecked);

        self.store.put_metadata(base, &metadata)?;
        states.push(RegistrationState::SchemaWritten);

        self.store.refresh_cache(base)?;
        states.push(RegistrationState::CacheRefreshed);

        Ok(metadata.children.len())
    }

    /// Restore the checkpoint if the stored document moved away from it.
    /// Failures here are logged; the caller still gets the original error.
    fn revert(
        &self,
        base: &TableIdentity,
        child: &str,
        checkpoint: &Checkpoint,
        cause: &RollupError,
    ) {
        let mut current = match self.store.get_metadata(base) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(
                    base = %base,
                    child,
                    error = %e,
                    "could not re-read metadata to revert rollup change"
                );
                return;
            }
        };

        let changed = match checkpoint {
            Checkpoint::ChildCount(count) if current.children.len() > *count => {
                current.children.truncate(*count);
                true
            }
            Checkpoint::ChildCount(_) => false,
            Checkpoint::Children(children) if current.children != *children => {
                current.children = children.clone();
                true
            }
            Checkpoint::Children(_) => false,
        };
        if !changed {
            tracing::debug!(base = %base, child, cause = %cause, "no metadata change to revert");
            return;
        }

        tracing::warn!(base = %base, child, cause = %cause, "reverting rollup metadata change");
        let restored = self
            .store
            .put_metadata(base, &current)
            .and_then(|()| self.store.refresh_cache(base));
        if let Err(e) = restored {
            tracing::error!(
                base = %base,
                child,
                error = %e,
                "failed to revert rollup metadata change"
            );
        }
    }
}
