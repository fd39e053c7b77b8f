// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local placement and spatial containment of exported elements.
//!
//! Each element is placed relative to the placement of its owning level
//! (building storey). A [`ContainmentOverride`] may re-parent the element to
//! another level, or to an explicit container placement.

use nalgebra::{Matrix4, Vector3};
use rustc_hash::FxHashMap;

use crate::document::{AttributeValue, Handle, Instance, OutputDocument};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::ids::ElementId;
use crate::transaction::BuildTransaction;

/// An exported level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInfo {
    pub level_id: ElementId,
    pub name: String,
    /// The `IfcBuildingStorey` instance.
    pub storey: Handle,
    /// The storey's `IfcLocalPlacement`.
    pub placement: Handle,
    pub elevation: f64,
}

/// Levels registered with a session.
#[derive(Debug, Clone, Default)]
pub struct LevelTable {
    levels: FxHashMap<ElementId, LevelInfo>,
}

impl LevelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: LevelInfo) -> Option<LevelInfo> {
        self.levels.insert(info.level_id, info)
    }

    pub fn get(&self, level_id: ElementId) -> Option<&LevelInfo> {
        self.levels.get(&level_id)
    }

    pub fn contains(&self, level_id: ElementId) -> bool {
        self.levels.contains_key(&level_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelInfo> {
        self.levels.values()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Per-element request to place it somewhere other than its owning level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainmentOverride {
    /// Level the element is contained in instead of its own.
    pub container_id: Option<ElementId>,
    /// Placement the element is positioned relative to.
    pub container_placement: Option<Handle>,
}

impl ContainmentOverride {
    pub fn to_level(container_id: ElementId) -> Self {
        Self {
            container_id: Some(container_id),
            container_placement: None,
        }
    }

    pub fn relative_to(mut self, placement: Handle) -> Self {
        self.container_placement = Some(placement);
        self
    }
}

/// Creates an `IfcAxis2Placement3D` from the rotation and translation of a transform.
pub(crate) fn axis_placement<D: OutputDocument>(
    tx: &mut BuildTransaction<'_, D>,
    transform: &Matrix4<f64>,
) -> Handle {
    let location = Vector3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)]);
    let axis = Vector3::new(transform[(0, 2)], transform[(1, 2)], transform[(2, 2)]);
    let ref_direction = Vector3::new(transform[(0, 0)], transform[(1, 0)], transform[(2, 0)]);

    let mut instance = Instance::new(EntityKind::IfcAxis2Placement3D).with(
        "Location",
        AttributeValue::reals([location.x, location.y, location.z]),
    );
    // Default axes are written as unset.
    if (axis - Vector3::z()).norm() < 1e-9 && (ref_direction - Vector3::x()).norm() < 1e-9 {
        instance = instance
            .with("Axis", AttributeValue::Null)
            .with("RefDirection", AttributeValue::Null);
    } else {
        instance = instance
            .with("Axis", AttributeValue::reals([axis.x, axis.y, axis.z]))
            .with(
                "RefDirection",
                AttributeValue::reals([ref_direction.x, ref_direction.y, ref_direction.z]),
            );
    }
    tx.create(instance)
}

/// Creates an `IfcLocalPlacement`, relative to `parent` when given.
pub(crate) fn local_placement<D: OutputDocument>(
    tx: &mut BuildTransaction<'_, D>,
    parent: Option<Handle>,
    transform: &Matrix4<f64>,
) -> Handle {
    let relative = axis_placement(tx, transform);
    tx.create(
        Instance::new(EntityKind::IfcLocalPlacement)
            .with(
                "PlacementRelTo",
                parent.map_or(AttributeValue::Null, AttributeValue::Ref),
            )
            .with("RelativePlacement", AttributeValue::Ref(relative)),
    )
}

/// Resolves where an element is placed and which level contains it.
#[derive(Debug, Clone, Copy)]
pub struct PlacementResolver<'a> {
    levels: &'a LevelTable,
}

impl<'a> PlacementResolver<'a> {
    pub fn new(levels: &'a LevelTable) -> Self {
        Self { levels }
    }

    /// Opens a placement scope for an element, nested in `parent`.
    ///
    /// Validation happens before anything is created, so a failed resolve
    /// leaves `parent` untouched.
    pub fn resolve<'t, D: OutputDocument>(
        &self,
        parent: &'t mut BuildTransaction<'_, D>,
        element: ElementId,
        level_id: ElementId,
        world: &Matrix4<f64>,
        containment: Option<&ContainmentOverride>,
    ) -> Result<PlacementScope<'t, D>> {
        let (level, relative_to) = self.target(parent.document(), element, level_id, containment)?;

        let local = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -level.elevation)) * world;
        let level_id = level.level_id;

        let mut tx = parent.nested();
        let placement = local_placement(&mut tx, Some(relative_to), &local);
        tracing::trace!(element = %element, level = %level_id, "placement resolved");

        Ok(PlacementScope {
            tx,
            placement,
            level_id,
            local,
            extrusion_axis: Vector3::z(),
        })
    }

    fn target<D: OutputDocument>(
        &self,
        document: &D,
        element: ElementId,
        level_id: ElementId,
        containment: Option<&ContainmentOverride>,
    ) -> Result<(&'a LevelInfo, Handle)> {
        let Some(containment) = containment else {
            let level = self
                .levels
                .get(level_id)
                .ok_or(Error::UnknownLevel {
                    element,
                    level: level_id,
                })?;
            return Ok((level, level.placement));
        };

        let invalid = |container| Error::ContainmentOverrideInvalid { element, container };

        let level = match containment.container_id {
            Some(container) => self.levels.get(container).ok_or_else(|| invalid(container))?,
            None => self.levels.get(level_id).ok_or(Error::UnknownLevel {
                element,
                level: level_id,
            })?,
        };

        let relative_to = match containment.container_placement {
            Some(placement) if is_local_placement(document, placement) => placement,
            Some(_) => return Err(invalid(containment.container_id.unwrap_or(ElementId::INVALID))),
            None => level.placement,
        };

        Ok((level, relative_to))
    }
}

fn is_local_placement<D: OutputDocument>(document: &D, handle: Handle) -> bool {
    document
        .get(handle)
        .is_some_and(|instance| instance.kind == EntityKind::IfcLocalPlacement)
}

/// Nested build scope holding an element's resolved placement.
///
/// Dropping it without [`commit`](PlacementScope::commit) discards the
/// placement and everything built inside the scope.
pub struct PlacementScope<'t, D: OutputDocument> {
    tx: BuildTransaction<'t, D>,
    placement: Handle,
    level_id: ElementId,
    local: Matrix4<f64>,
    extrusion_axis: Vector3<f64>,
}

impl<'t, D: OutputDocument> PlacementScope<'t, D> {
    /// The element's `IfcLocalPlacement`.
    pub fn placement(&self) -> Handle {
        self.placement
    }

    /// Level that contains the element.
    pub fn level_id(&self) -> ElementId {
        self.level_id
    }

    /// Transform relative to the containing level.
    pub fn local_transform(&self) -> &Matrix4<f64> {
        &self.local
    }

    pub fn transaction(&mut self) -> &mut BuildTransaction<'t, D> {
        &mut self.tx
    }

    pub fn extrusion_axis(&self) -> &Vector3<f64> {
        &self.extrusion_axis
    }

    /// Overrides the extrusion direction for swept geometry built in this scope.
    pub fn set_extrusion_axis(&mut self, axis: Vector3<f64>) {
        self.extrusion_axis = axis;
    }

    /// Commits the scope into its parent. Returns the placement and level.
    pub fn commit(self) -> (Handle, ElementId) {
        self.tx.commit();
        (self.placement, self.level_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InstanceArena;
    use approx::assert_relative_eq;

    fn setup(doc: &mut InstanceArena) -> LevelTable {
        let mut tx = BuildTransaction::begin(doc);
        let mut levels = LevelTable::new();
        for (id, elevation) in [(1, 0.0), (2, 3.5)] {
            let placement =
                local_placement(&mut tx, None, &Matrix4::new_translation(&Vector3::new(0.0, 0.0, elevation)));
            let storey = tx.create(Instance::new(EntityKind::IfcBuildingStorey));
            levels.insert(LevelInfo {
                level_id: ElementId::new(id),
                name: format!("Level {id}"),
                storey,
                placement,
                elevation,
            });
        }
        tx.commit();
        levels
    }

    #[test]
    fn placement_is_relative_to_level_elevation() {
        let mut doc = InstanceArena::new();
        let levels = setup(&mut doc);
        let resolver = PlacementResolver::new(&levels);
        let world = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 4.0));

        let mut tx = BuildTransaction::begin(&mut doc);
        let scope = resolver
            .resolve(&mut tx, ElementId::new(10), ElementId::new(2), &world, None)
            .unwrap();
        assert_relative_eq!(scope.local_transform()[(2, 3)], 0.5);
        let (placement, level) = scope.commit();
        tx.commit();

        assert_eq!(level, ElementId::new(2));
        let rel_to = doc.get(placement).unwrap().attribute("PlacementRelTo").cloned();
        assert_eq!(rel_to, Some(AttributeValue::Ref(levels.get(ElementId::new(2)).unwrap().placement)));
    }

    #[test]
    fn override_reparents_to_container_level() {
        let mut doc = InstanceArena::new();
        let levels = setup(&mut doc);
        let resolver = PlacementResolver::new(&levels);
        let over = ContainmentOverride::to_level(ElementId::new(1));

        let mut tx = BuildTransaction::begin(&mut doc);
        let scope = resolver
            .resolve(&mut tx, ElementId::new(10), ElementId::new(2), &Matrix4::identity(), Some(&over))
            .unwrap();
        assert_eq!(scope.level_id(), ElementId::new(1));
    }

    #[test]
    fn unresolvable_override_fails_without_side_effects() {
        let mut doc = InstanceArena::new();
        let levels = setup(&mut doc);
        let before = doc.len();
        let resolver = PlacementResolver::new(&levels);
        let over = ContainmentOverride::to_level(ElementId::new(99));

        let mut tx = BuildTransaction::begin(&mut doc);
        let err = resolver
            .resolve(&mut tx, ElementId::new(10), ElementId::new(1), &Matrix4::identity(), Some(&over))
            .err();
        assert!(matches!(
            err,
            Some(Error::ContainmentOverrideInvalid { container, .. }) if container == ElementId::new(99)
        ));
        assert_eq!(tx.pending(), 0);
        drop(tx);
        assert_eq!(doc.len(), before);
    }

    #[test]
    fn override_placement_must_be_a_local_placement() {
        let mut doc = InstanceArena::new();
        let levels = setup(&mut doc);
        let mut tx = BuildTransaction::begin(&mut doc);
        let wall = tx.create(Instance::new(EntityKind::IfcWall));
        let host = local_placement(&mut tx, None, &Matrix4::identity());
        tx.commit();
        let resolver = PlacementResolver::new(&levels);

        let mut tx = BuildTransaction::begin(&mut doc);
        let over = ContainmentOverride::to_level(ElementId::new(1)).relative_to(wall);
        let err = resolver
            .resolve(&mut tx, ElementId::new(10), ElementId::new(1), &Matrix4::identity(), Some(&over))
            .err();
        assert!(matches!(
            err,
            Some(Error::ContainmentOverrideInvalid { container, .. }) if container == ElementId::new(1)
        ));

        let over = ContainmentOverride::to_level(ElementId::new(1)).relative_to(host);
        let scope = resolver
            .resolve(&mut tx, ElementId::new(10), ElementId::new(1), &Matrix4::identity(), Some(&over))
            .unwrap();
        let (placement, _) = scope.commit();
        assert_eq!(
            tx.document().get(placement).unwrap().attribute("PlacementRelTo"),
            Some(&AttributeValue::Ref(host))
        );
    }

    #[test]
    fn unknown_level_is_reported() {
        let mut doc = InstanceArena::new();
        let levels = setup(&mut doc);
        let resolver = PlacementResolver::new(&levels);
        let mut tx = BuildTransaction::begin(&mut doc);
        let err = resolver
            .resolve(&mut tx, ElementId::new(10), ElementId::new(7), &Matrix4::identity(), None)
            .err();
        assert!(matches!(err, Some(Error::UnknownLevel { .. })));
    }

    #[test]
    fn dropped_scope_releases_placement() {
        let mut doc = InstanceArena::new();
        let levels = setup(&mut doc);
        let before = doc.len();
        let resolver = PlacementResolver::new(&levels);

        let mut tx = BuildTransaction::begin(&mut doc);
        {
            let mut scope = resolver
                .resolve(&mut tx, ElementId::new(10), ElementId::new(1), &Matrix4::identity(), None)
                .unwrap();
            scope.set_extrusion_axis(Vector3::x());
            assert_eq!(scope.extrusion_axis(), &Vector3::x());
        }
        assert_eq!(tx.pending(), 0);
        tx.commit();
        assert_eq!(doc.len(), before);
    }
}
