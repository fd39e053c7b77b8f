// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scoped build transactions over the output document.
//!
//! A [`BuildTransaction`] marks the document when it begins. Instances
//! created through it become durable only on [`commit`](BuildTransaction::commit);
//! dropping the transaction on any other path (early return, `?`, panic
//! unwinding) removes every instance created since the mark, including those
//! created by nested scopes.
//!
//! Nested scopes borrow their parent mutably, so they are always released
//! before the parent can be used again.

use crate::document::{Handle, Instance, Mark, OutputDocument};
use crate::ids::GlobalId;

/// Transactional scope over an [`OutputDocument`].
///
/// # Example
///
/// ```
/// use ifc_lite_export::{BuildTransaction, EntityKind, Instance, InstanceArena, OutputDocument};
///
/// let mut doc = InstanceArena::new();
/// {
///     let mut tx = BuildTransaction::begin(&mut doc);
///     tx.create(Instance::new(EntityKind::IfcWall));
///     // dropped without commit
/// }
/// assert_eq!(doc.len(), 0);
///
/// let mut tx = BuildTransaction::begin(&mut doc);
/// let wall = tx.create(Instance::new(EntityKind::IfcWall));
/// tx.commit();
/// assert!(doc.contains(wall));
/// ```
pub struct BuildTransaction<'a, D: OutputDocument> {
    document: &'a mut D,
    mark: Mark,
    depth: usize,
    committed: bool,
}

impl<'a, D: OutputDocument> BuildTransaction<'a, D> {
    /// Begins a top-level scope.
    pub fn begin(document: &'a mut D) -> Self {
        Self::at_depth(document, 0)
    }

    fn at_depth(document: &'a mut D, depth: usize) -> Self {
        let mark = document.mark();
        tracing::trace!(depth, "begin build scope");
        Self {
            document,
            mark,
            depth,
            committed: false,
        }
    }

    /// Begins a scope nested inside this one.
    ///
    /// Committing the nested scope only hands its instances to this scope;
    /// they still disappear if this scope is rolled back.
    pub fn nested(&mut self) -> BuildTransaction<'_, D> {
        BuildTransaction::at_depth(&mut *self.document, self.depth + 1)
    }

    /// Creates an instance inside this scope.
    pub fn create(&mut self, instance: Instance) -> Handle {
        self.document.create(instance)
    }

    /// Issues a fresh GlobalId from the document.
    pub fn new_global_id(&mut self) -> GlobalId {
        self.document.new_global_id()
    }

    /// Read access to the document, including instances of this scope.
    pub fn document(&self) -> &D {
        &*self.document
    }

    /// Nesting depth; 0 for a top-level scope.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of instances created since this scope began.
    pub fn pending(&self) -> usize {
        self.document.mark().0.saturating_sub(self.mark.0)
    }

    /// Makes every instance created in this scope durable.
    pub fn commit(mut self) {
        self.committed = true;
        if self.depth == 0 {
            self.document.release(self.mark);
        }
        tracing::trace!(depth = self.depth, "commit build scope");
    }

    /// Explicitly discards the scope. Same as dropping it.
    pub fn rollback(self) {}
}

impl<'a, D: OutputDocument> Drop for BuildTransaction<'a, D> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let removed = self.document.rollback_to(self.mark);
        if removed > 0 {
            tracing::trace!(depth = self.depth, removed, "rolled back build scope");
        }
    }
}
