// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Element handle registry and relationship accumulators.
//!
//! While elements are exported one by one, group membership, assembly
//! membership and type property sets are only *recorded* here. The
//! [`RelationshipEmitter`](crate::RelationshipEmitter) turns them into
//! relationship instances once every member is known.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::document::Handle;
use crate::entity::{EntityKind, ExportType};
use crate::ids::ElementId;

/// Accumulated members of one model group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    /// Group instance created ahead of emission, if any.
    pub group_handle: Option<Handle>,
    pub member_handles: BTreeSet<Handle>,
    pub export_type: ExportType,
}

impl Default for GroupInfo {
    fn default() -> Self {
        Self {
            group_handle: None,
            member_handles: BTreeSet::new(),
            export_type: ExportType::new(EntityKind::IfcGroup),
        }
    }
}

/// Accumulated members of one assembly instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyInstanceInfo {
    pub assembly_handle: Option<Handle>,
    pub member_handles: BTreeSet<Handle>,
    pub assigned_level_id: ElementId,
}

impl Default for AssemblyInstanceInfo {
    fn default() -> Self {
        Self {
            assembly_handle: None,
            member_handles: BTreeSet::new(),
            assigned_level_id: ElementId::INVALID,
        }
    }
}

/// Accumulated property sets of one type and the instances using it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypePropertyInfo {
    pub property_set_handles: BTreeSet<Handle>,
    pub element_handles: BTreeSet<Handle>,
    assigned_to_type: bool,
    /// Fingerprint of the shared property values.
    fingerprint: Option<u64>,
    diverged: bool,
}

impl TypePropertyInfo {
    /// Fingerprint of the shared property sets, once the first instance is recorded.
    pub fn fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Whether the property sets belong to the type object instead of the instances.
    pub fn assigned_to_type(&self) -> bool {
        self.assigned_to_type
    }

    /// `true` when at least two instances were recorded and all of them
    /// carried identical property values.
    pub fn has_uniform_values(&self) -> bool {
        !self.diverged && self.fingerprint.is_some() && self.element_handles.len() >= 2
    }

    fn record_fingerprint(&mut self, fingerprint: u64) {
        match self.fingerprint {
            None => self.fingerprint = Some(fingerprint),
            Some(existing) if existing != fingerprint => self.diverged = true,
            Some(_) => {}
        }
    }

    /// One-way switch to type assignment. Returns `true` if it flipped.
    fn assign_to_type(&mut self) -> bool {
        if self.assigned_to_type {
            return false;
        }
        self.assigned_to_type = true;
        true
    }
}

/// Element → handle map plus group, assembly and type accumulators.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    elements: FxHashMap<ElementId, Handle>,
    groups: FxHashMap<ElementId, GroupInfo>,
    assemblies: FxHashMap<ElementId, AssemblyInstanceInfo>,
    type_properties: FxHashMap<ElementId, TypePropertyInfo>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handle exported for an element. Returns the previous one.
    pub fn register(&mut self, id: ElementId, handle: Handle) -> Option<Handle> {
        if !id.is_valid() {
            tracing::debug!(handle = ?handle, "not registering handle for invalid element id");
            return None;
        }
        self.elements.insert(id, handle)
    }

    pub fn lookup(&self, id: ElementId) -> Option<Handle> {
        self.elements.get(&id).copied()
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Adds a member to a group. Returns `false` if it was already a member.
    pub fn add_to_group(&mut self, group_id: ElementId, member: Handle) -> bool {
        self.groups.entry(group_id).or_default().member_handles.insert(member)
    }

    /// Sets the entity kind the group is exported as.
    pub fn set_group_export_type(&mut self, group_id: ElementId, export_type: ExportType) {
        self.groups.entry(group_id).or_default().export_type = export_type;
    }

    /// Uses an already created instance as the group instead of creating one
    /// during emission.
    pub fn set_group_handle(&mut self, group_id: ElementId, handle: Handle) {
        self.groups.entry(group_id).or_default().group_handle = Some(handle);
    }

    /// Adds a member to an assembly instance. The first valid level wins.
    pub fn add_to_assembly(
        &mut self,
        assembly_id: ElementId,
        member: Handle,
        level_id: ElementId,
    ) -> bool {
        let info = self.assemblies.entry(assembly_id).or_default();
        if !info.assigned_level_id.is_valid() {
            info.assigned_level_id = level_id;
        } else if level_id.is_valid() && level_id != info.assigned_level_id {
            tracing::debug!(
                assembly = %assembly_id,
                kept = %info.assigned_level_id,
                ignored = %level_id,
                "assembly member on a different level"
            );
        }
        info.member_handles.insert(member)
    }

    /// Records an instance of a type together with the property sets created
    /// for it and a fingerprint of their values.
    pub fn add_type_property(
        &mut self,
        type_id: ElementId,
        element: Handle,
        property_sets: &[Handle],
        fingerprint: u64,
    ) {
        let info = self.type_properties.entry(type_id).or_default();
        info.element_handles.insert(element);
        info.property_set_handles.extend(property_sets.iter().copied());
        info.record_fingerprint(fingerprint);
    }

    /// Records that an instance of the type carried property values different
    /// from the shared ones, so the type can no longer own them.
    pub fn mark_type_diverged(&mut self, type_id: ElementId) {
        self.type_properties.entry(type_id).or_default().diverged = true;
    }

    /// Moves a type's property sets onto the type object. One-way; returns
    /// `true` only on the call that flips it.
    pub fn assign_type_properties_to_type(&mut self, type_id: ElementId) -> bool {
        self.type_properties
            .get_mut(&type_id)
            .map_or(false, TypePropertyInfo::assign_to_type)
    }

    pub fn groups(&self) -> &FxHashMap<ElementId, GroupInfo> {
        &self.groups
    }

    pub fn assemblies(&self) -> &FxHashMap<ElementId, AssemblyInstanceInfo> {
        &self.assemblies
    }

    pub fn type_properties(&self) -> &FxHashMap<ElementId, TypePropertyInfo> {
        &self.type_properties
    }
}
