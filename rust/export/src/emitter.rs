// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-of-session relationship emission.
//!
//! Emission runs in two steps. [`RelationshipEmitter::plan`] is a pure
//! function of the registry and the product collector and produces a sorted
//! [`RelationshipPlan`]. [`RelationshipEmitter::emit`] validates every handle
//! the plan references and then writes all relationships in one transaction.
//! An [`EmissionLedger`] remembers what was written, so emitting the same
//! plan again writes nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rustc_hash::FxHashMap;

use crate::admission::AdmissionFilter;
use crate::collector::ProductCollector;
use crate::document::{AttributeValue, Handle, Instance, OutputDocument};
use crate::entity::{EntityKind, ExportType};
use crate::error::{Error, Result};
use crate::ids::ElementId;
use crate::placement::LevelTable;
use crate::registry::HandleRegistry;
use crate::transaction::BuildTransaction;

/// Identity of one planned relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipKey {
    Group(ElementId),
    Assembly(ElementId),
    TypeProperties {
        type_id: ElementId,
        property_set: Handle,
    },
    Containment(ElementId),
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKey::Group(id) => write!(f, "group {id}"),
            RelationshipKey::Assembly(id) => write!(f, "assembly {id}"),
            RelationshipKey::TypeProperties {
                type_id,
                property_set,
            } => write!(f, "type {type_id} property set {property_set:?}"),
            RelationshipKey::Containment(id) => write!(f, "containment in level {id}"),
        }
    }
}

/// A relationship to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedRelationship {
    /// Group instance (new unless `existing`) plus `IfcRelAssignsToGroup`.
    Group {
        existing: Option<Handle>,
        export_type: ExportType,
        members: Vec<Handle>,
    },
    /// `IfcElementAssembly` plus `IfcRelAggregates`.
    Assembly {
        existing: Option<Handle>,
        placement: Option<Handle>,
        members: Vec<Handle>,
    },
    /// `IfcRelDefinesByProperties` for one property set.
    TypeProperties {
        property_set: Handle,
        related: Vec<Handle>,
    },
    /// `IfcRelContainedInSpatialStructure` for one level.
    Containment {
        storey: Handle,
        products: Vec<Handle>,
        assemblies: Vec<ElementId>,
    },
}

impl PlannedRelationship {
    /// Existing handles the relationship references.
    fn referenced_handles(&self) -> Vec<Handle> {
        match self {
            PlannedRelationship::Group {
                existing, members, ..
            } => existing.iter().chain(members).copied().collect(),
            PlannedRelationship::Assembly {
                existing,
                placement,
                members,
            } => existing.iter().chain(placement).chain(members).copied().collect(),
            PlannedRelationship::TypeProperties {
                property_set,
                related,
            } => std::iter::once(property_set).chain(related).copied().collect(),
            PlannedRelationship::Containment {
                storey, products, ..
            } => std::iter::once(storey).chain(products).copied().collect(),
        }
    }
}

/// Relationships to write, sorted by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipPlan {
    entries: Vec<(RelationshipKey, PlannedRelationship)>,
}

impl RelationshipPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(RelationshipKey, PlannedRelationship)> {
        self.entries.iter()
    }

    pub fn get(&self, key: &RelationshipKey) -> Option<&PlannedRelationship> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }
}

/// Relationships already written in this session.
#[derive(Debug, Clone, Default)]
pub struct EmissionLedger {
    emitted: FxHashMap<RelationshipKey, Handle>,
    assemblies: FxHashMap<ElementId, Handle>,
}

impl EmissionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &RelationshipKey) -> bool {
        self.emitted.contains_key(key)
    }

    /// Relationship instance written for a key.
    pub fn relationship(&self, key: &RelationshipKey) -> Option<Handle> {
        self.emitted.get(key).copied()
    }

    /// `IfcElementAssembly` written for an assembly instance.
    pub fn assembly(&self, assembly_id: ElementId) -> Option<Handle> {
        self.assemblies.get(&assembly_id).copied()
    }

    pub fn len(&self) -> usize {
        self.emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }
}

/// Turns accumulated registry state into relationship instances.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipEmitter<'a> {
    admission: &'a AdmissionFilter,
    levels: &'a LevelTable,
}

impl<'a> RelationshipEmitter<'a> {
    pub fn new(admission: &'a AdmissionFilter, levels: &'a LevelTable) -> Self {
        Self { admission, levels }
    }

    /// Computes the relationships implied by the registry and collector.
    ///
    /// Groups and assemblies without members are left out, as are those
    /// whose entity kind is not admitted. Members of a non-admitted assembly
    /// are contained in the assembly's level directly.
    pub fn plan(&self, registry: &HandleRegistry, collector: &ProductCollector) -> RelationshipPlan {
        let mut entries = Vec::new();
        let mut containment: BTreeMap<ElementId, (BTreeSet<Handle>, Vec<ElementId>)> =
            BTreeMap::new();

        for (level, products) in collector.iter() {
            containment
                .entry(level)
                .or_default()
                .0
                .extend(products.iter().copied());
        }

        for (&group_id, info) in registry.groups() {
            if info.member_handles.is_empty() {
                continue;
            }
            if let Err(rejection) = self.admission.check(&info.export_type) {
                tracing::debug!(group = %group_id, %rejection, "group not emitted");
                continue;
            }
            entries.push((
                RelationshipKey::Group(group_id),
                PlannedRelationship::Group {
                    existing: info.group_handle,
                    export_type: info.export_type.clone(),
                    members: info.member_handles.iter().copied().collect(),
                },
            ));
        }

        let assembly_type = ExportType::new(EntityKind::IfcElementAssembly);
        let assemblies_admitted = self.admission.admits(&assembly_type);
        for (&assembly_id, info) in registry.assemblies() {
            if info.member_handles.is_empty() {
                continue;
            }
            let level = self.levels.get(info.assigned_level_id);
            if !assemblies_admitted {
                tracing::debug!(assembly = %assembly_id, "assembly not admitted, containing members directly");
                if level.is_some() {
                    containment
                        .entry(info.assigned_level_id)
                        .or_default()
                        .0
                        .extend(info.member_handles.iter().copied());
                }
                continue;
            }
            if level.is_some() {
                containment
                    .entry(info.assigned_level_id)
                    .or_default()
                    .1
                    .push(assembly_id);
            }
            entries.push((
                RelationshipKey::Assembly(assembly_id),
                PlannedRelationship::Assembly {
                    existing: info.assembly_handle,
                    placement: level.map(|l| l.placement),
                    members: info.member_handles.iter().copied().collect(),
                },
            ));
        }

        for (&type_id, info) in registry.type_properties() {
            let related: Vec<Handle> = if info.assigned_to_type() {
                // Assigned sets never go back onto the instances.
                let Some(handle) = registry.lookup(type_id) else {
                    tracing::warn!(
                        type_id = %type_id,
                        "type properties assigned to an unexported type, not emitted"
                    );
                    continue;
                };
                vec![handle]
            } else {
                info.element_handles.iter().copied().collect()
            };
            if related.is_empty() {
                continue;
            }
            for &property_set in &info.property_set_handles {
                entries.push((
                    RelationshipKey::TypeProperties {
                        type_id,
                        property_set,
                    },
                    PlannedRelationship::TypeProperties {
                        property_set,
                        related: related.clone(),
                    },
                ));
            }
        }

        for (level_id, (products, mut assemblies)) in containment {
            if products.is_empty() && assemblies.is_empty() {
                continue;
            }
            let Some(level) = self.levels.get(level_id) else {
                tracing::warn!(level = %level_id, "products collected for unknown level");
                continue;
            };
            assemblies.sort_unstable();
            entries.push((
                RelationshipKey::Containment(level_id),
                PlannedRelationship::Containment {
                    storey: level.storey,
                    products: products.into_iter().collect(),
                    assemblies,
                },
            ));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        RelationshipPlan { entries }
    }

    /// Writes every planned relationship not yet in the ledger.
    ///
    /// Returns the number of relationship instances created. A referenced
    /// handle missing from the document fails the whole emission with
    /// [`Error::DanglingHandle`] before anything is written.
    pub fn emit<D: OutputDocument>(
        &self,
        plan: &RelationshipPlan,
        document: &mut D,
        ledger: &mut EmissionLedger,
    ) -> Result<usize> {
        let pending: Vec<_> = plan
            .iter()
            .filter(|(key, _)| !ledger.contains(key))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        for (key, relationship) in &pending {
            for handle in relationship.referenced_handles() {
                if !document.contains(handle) {
                    return Err(Error::DanglingHandle {
                        relationship: key.to_string(),
                        handle,
                    });
                }
            }
        }

        let mut tx = BuildTransaction::begin(document);
        let mut written = Vec::with_capacity(pending.len());
        let mut new_assemblies: FxHashMap<ElementId, Handle> = FxHashMap::default();

        for (key, relationship) in pending {
            let handle = match relationship {
                PlannedRelationship::Group {
                    existing,
                    export_type,
                    members,
                } => {
                    let group = match existing {
                        Some(handle) => *handle,
                        None => {
                            let global_id = tx.new_global_id();
                            tx.create(
                                Instance::new(export_type.entity)
                                    .with_global_id(global_id)
                                    .with("Name", AttributeValue::Null)
                                    .with(
                                        "PredefinedType",
                                        export_type
                                            .predefined_type
                                            .clone()
                                            .map_or(AttributeValue::Null, AttributeValue::Enum),
                                    ),
                            )
                        }
                    };
                    let global_id = tx.new_global_id();
                    tx.create(
                        Instance::new(EntityKind::IfcRelAssignsToGroup)
                            .with_global_id(global_id)
                            .with("RelatedObjects", AttributeValue::refs(members.iter().copied()))
                            .with("RelatedObjectsType", AttributeValue::Null)
                            .with("RelatingGroup", AttributeValue::Ref(group)),
                    )
                }
                PlannedRelationship::Assembly {
                    existing,
                    placement,
                    members,
                } => {
                    let assembly = match existing {
                        Some(handle) => *handle,
                        None => {
                            let global_id = tx.new_global_id();
                            tx.create(
                                Instance::new(EntityKind::IfcElementAssembly)
                                    .with_global_id(global_id)
                                    .with("Name", AttributeValue::Null)
                                    .with(
                                        "ObjectPlacement",
                                        placement.map_or(AttributeValue::Null, AttributeValue::Ref),
                                    )
                                    .with("Representation", AttributeValue::Null),
                            )
                        }
                    };
                    if let RelationshipKey::Assembly(assembly_id) = key {
                        new_assemblies.insert(*assembly_id, assembly);
                    }
                    let global_id = tx.new_global_id();
                    tx.create(
                        Instance::new(EntityKind::IfcRelAggregates)
                            .with_global_id(global_id)
                            .with("RelatingObject", AttributeValue::Ref(assembly))
                            .with("RelatedObjects", AttributeValue::refs(members.iter().copied())),
                    )
                }
                PlannedRelationship::TypeProperties {
                    property_set,
                    related,
                } => {
                    let global_id = tx.new_global_id();
                    tx.create(
                        Instance::new(EntityKind::IfcRelDefinesByProperties)
                            .with_global_id(global_id)
                            .with("RelatedObjects", AttributeValue::refs(related.iter().copied()))
                            .with("RelatingPropertyDefinition", AttributeValue::Ref(*property_set)),
                    )
                }
                PlannedRelationship::Containment {
                    storey,
                    products,
                    assemblies,
                } => {
                    let contained = products.iter().copied().chain(
                        assemblies
                            .iter()
                            .filter_map(|id| new_assemblies.get(id).copied().or_else(|| ledger.assembly(*id))),
                    );
                    let global_id = tx.new_global_id();
                    tx.create(
                        Instance::new(EntityKind::IfcRelContainedInSpatialStructure)
                            .with_global_id(global_id)
                            .with("RelatedElements", AttributeValue::refs(contained))
                            .with("RelatingStructure", AttributeValue::Ref(*storey)),
                    )
                }
            };
            written.push((*key, handle));
        }
        tx.commit();

        let count = written.len();
        ledger.emitted.extend(written);
        ledger.assemblies.extend(new_assemblies);
        tracing::debug!(count, "emitted relationships");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InstanceArena;
    use crate::placement::LevelInfo;

    struct Fixture {
        doc: InstanceArena,
        levels: LevelTable,
        products: Vec<Handle>,
    }

    fn fixture(products: usize) -> Fixture {
        let mut doc = InstanceArena::new();
        let mut tx = BuildTransaction::begin(&mut doc);
        let placement = tx.create(Instance::new(EntityKind::IfcLocalPlacement));
        let storey = tx.create(Instance::new(EntityKind::IfcBuildingStorey));
        let products = (0..products)
            .map(|_| tx.create(Instance::new(EntityKind::IfcWall)))
            .collect();
        tx.commit();

        let mut levels = LevelTable::new();
        levels.insert(LevelInfo {
            level_id: ElementId::new(1),
            name: "Level 1".into(),
            storey,
            placement,
            elevation: 0.0,
        });
        Fixture {
            doc,
            levels,
            products,
        }
    }

    #[test]
    fn one_group_and_one_relationship_per_non_empty_group() {
        let mut fx = fixture(3);
        let mut registry = HandleRegistry::new();
        for &p in &fx.products {
            registry.add_to_group(ElementId::new(10), p);
        }
        registry.set_group_export_type(ElementId::new(11), EntityKind::IfcZone.into());

        let admission = AdmissionFilter::default();
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &ProductCollector::new());
        assert_eq!(plan.len(), 1);

        let mut ledger = EmissionLedger::new();
        assert_eq!(emitter.emit(&plan, &mut fx.doc, &mut ledger).unwrap(), 1);
        assert_eq!(fx.doc.count_of(EntityKind::IfcGroup), 1);
        assert_eq!(fx.doc.count_of(EntityKind::IfcZone), 0);

        let (_, rel) = fx
            .doc
            .instances_of(EntityKind::IfcRelAssignsToGroup)
            .next()
            .unwrap();
        assert_eq!(rel.references().len(), 4);
    }

    #[test]
    fn emission_is_idempotent() {
        let mut fx = fixture(2);
        let mut registry = HandleRegistry::new();
        registry.add_to_group(ElementId::new(10), fx.products[0]);
        let mut collector = ProductCollector::new();
        collector.add(ElementId::new(1), fx.products[1]);

        let admission = AdmissionFilter::default();
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &collector);
        assert_eq!(plan, emitter.plan(&registry, &collector));

        let mut ledger = EmissionLedger::new();
        assert_eq!(emitter.emit(&plan, &mut fx.doc, &mut ledger).unwrap(), 2);
        let len = fx.doc.len();
        assert_eq!(emitter.emit(&plan, &mut fx.doc, &mut ledger).unwrap(), 0);
        assert_eq!(fx.doc.len(), len);
    }

    #[test]
    fn dangling_handle_is_fatal_and_writes_nothing() {
        let mut fx = fixture(1);
        let mut registry = HandleRegistry::new();
        registry.add_to_group(ElementId::new(10), fx.products[0]);

        let stray = {
            let mut tx = BuildTransaction::begin(&mut fx.doc);
            tx.create(Instance::new(EntityKind::IfcWall))
        };
        assert!(!fx.doc.contains(stray));
        registry.add_to_group(ElementId::new(20), stray);

        let admission = AdmissionFilter::default();
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &ProductCollector::new());
        let before = fx.doc.len();
        let mut ledger = EmissionLedger::new();
        let err = emitter.emit(&plan, &mut fx.doc, &mut ledger).unwrap_err();
        assert!(matches!(err, Error::DanglingHandle { .. }));
        assert_eq!(fx.doc.len(), before);
        assert!(ledger.is_empty());
    }

    #[test]
    fn assemblies_join_level_containment() {
        let mut fx = fixture(2);
        let mut registry = HandleRegistry::new();
        for &p in &fx.products {
            registry.add_to_assembly(ElementId::new(30), p, ElementId::new(1));
        }
        let admission = AdmissionFilter::default();
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &ProductCollector::new());
        let mut ledger = EmissionLedger::new();
        emitter.emit(&plan, &mut fx.doc, &mut ledger).unwrap();

        let assembly = ledger.assembly(ElementId::new(30)).unwrap();
        let (_, rel) = fx
            .doc
            .instances_of(EntityKind::IfcRelContainedInSpatialStructure)
            .next()
            .unwrap();
        assert_eq!(
            rel.attribute("RelatedElements"),
            Some(&AttributeValue::refs([assembly]))
        );
    }

    #[test]
    fn filtered_assembly_members_are_contained_directly() {
        let fx = fixture(2);
        let mut registry = HandleRegistry::new();
        for &p in &fx.products {
            registry.add_to_assembly(ElementId::new(30), p, ElementId::new(1));
        }
        let admission = AdmissionFilter::new(
            crate::admission::ExcludeList::from_names(["IfcElementAssembly"]),
            None,
        );
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &ProductCollector::new());

        assert!(plan.get(&RelationshipKey::Assembly(ElementId::new(30))).is_none());
        match plan.get(&RelationshipKey::Containment(ElementId::new(1))) {
            Some(PlannedRelationship::Containment { products, .. }) => {
                assert_eq!(products.len(), 2)
            }
            other => panic!("unexpected plan entry: {other:?}"),
        }
    }

    #[test]
    fn type_assigned_properties_only_reference_the_type() {
        let mut fx = fixture(2);
        let mut tx = BuildTransaction::begin(&mut fx.doc);
        let wall_type = tx.create(Instance::new(EntityKind::IfcWallType));
        let pset = tx.create(Instance::new(EntityKind::IfcPropertySet));
        tx.commit();

        let ty = ElementId::new(40);
        let mut registry = HandleRegistry::new();
        registry.register(ty, wall_type);
        registry.add_type_property(ty, fx.products[0], &[pset], 1);
        registry.add_type_property(ty, fx.products[1], &[], 1);
        registry.assign_type_properties_to_type(ty);

        let admission = AdmissionFilter::default();
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &ProductCollector::new());
        let related = match plan.get(&RelationshipKey::TypeProperties {
            type_id: ty,
            property_set: pset,
        }) {
            Some(PlannedRelationship::TypeProperties { related, .. }) => related.clone(),
            other => panic!("unexpected plan entry: {other:?}"),
        };
        assert_eq!(related, vec![wall_type]);
        assert!(fx.products.iter().all(|p| !related.contains(p)));
    }

    #[test]
    fn assigned_properties_of_unexported_type_are_not_attached_to_instances() {
        let mut fx = fixture(2);
        let mut tx = BuildTransaction::begin(&mut fx.doc);
        let pset = tx.create(Instance::new(EntityKind::IfcPropertySet));
        tx.commit();

        let ty = ElementId::new(41);
        let mut registry = HandleRegistry::new();
        registry.add_type_property(ty, fx.products[0], &[pset], 1);
        registry.add_type_property(ty, fx.products[1], &[], 1);
        assert!(registry.assign_type_properties_to_type(ty));

        let admission = AdmissionFilter::default();
        let emitter = RelationshipEmitter::new(&admission, &fx.levels);
        let plan = emitter.plan(&registry, &ProductCollector::new());
        assert!(plan.is_empty());

        let mut ledger = EmissionLedger::new();
        assert_eq!(emitter.emit(&plan, &mut fx.doc, &mut ledger).unwrap(), 0);
        assert_eq!(fx.doc.count_of(EntityKind::IfcRelDefinesByProperties), 0);
        assert!(registry.type_properties()[&ty].assigned_to_type());
    }
}
