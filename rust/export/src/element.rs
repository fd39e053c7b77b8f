// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The host model as seen by the export core.
//!
//! Hosts implement [`ModelElement`] for their own element type.
//! [`ElementRecord`] is a plain in-memory implementation used by hosts that
//! pre-extract their model, and by the tests.

use std::cell::Cell;
use std::hash::{Hash, Hasher};

use nalgebra::Matrix4;
use rustc_hash::FxHasher;

use crate::document::AttributeValue;
use crate::entity::{EntityKind, ExportType};
use crate::geometry::GeometryPrimitive;
use crate::ids::{BodyGroupKey, ElementId};
use crate::placement::ContainmentOverride;

/// Membership of an element in a model group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMembership {
    pub group_id: ElementId,
    /// Group type the group was placed from, `INVALID` for ad-hoc groups.
    pub group_type_id: ElementId,
    pub member_index: i32,
    /// `false` once the member was edited away from its group type.
    pub unmodified: bool,
    /// Entity kind the group is exported as.
    pub export_type: ExportType,
}

impl GroupMembership {
    pub fn new(group_id: ElementId, group_type_id: ElementId, member_index: i32) -> Self {
        Self {
            group_id,
            group_type_id,
            member_index,
            unmodified: true,
            export_type: ExportType::new(EntityKind::IfcGroup),
        }
    }

    pub fn exported_as(mut self, export_type: ExportType) -> Self {
        self.export_type = export_type;
        self
    }

    pub fn modified(mut self) -> Self {
        self.unmodified = false;
        self
    }

    /// Reuse key, only for unmodified members of a typed group.
    pub fn body_group_key(&self) -> Option<BodyGroupKey> {
        reuse_key(self.group_type_id, self.member_index, self.unmodified)
    }
}

/// Membership of an element in an assembly instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyMembership {
    pub assembly_id: ElementId,
    pub assembly_type_id: ElementId,
    pub member_index: i32,
    pub unmodified: bool,
}

impl AssemblyMembership {
    pub fn new(assembly_id: ElementId, assembly_type_id: ElementId, member_index: i32) -> Self {
        Self {
            assembly_id,
            assembly_type_id,
            member_index,
            unmodified: true,
        }
    }

    pub fn modified(mut self) -> Self {
        self.unmodified = false;
        self
    }

    pub fn body_group_key(&self) -> Option<BodyGroupKey> {
        reuse_key(self.assembly_type_id, self.member_index, self.unmodified)
    }
}

fn reuse_key(type_id: ElementId, member_index: i32, unmodified: bool) -> Option<BodyGroupKey> {
    (unmodified && type_id.is_valid() && member_index >= 0)
        .then(|| BodyGroupKey::new(type_id, member_index))
}

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl PropertyValue {
    pub(crate) fn to_attribute(&self) -> AttributeValue {
        match self {
            PropertyValue::Text(s) => AttributeValue::String(s.clone()),
            PropertyValue::Integer(i) => AttributeValue::Int(*i),
            PropertyValue::Real(r) => AttributeValue::Real(*r),
            PropertyValue::Boolean(b) => AttributeValue::Bool(*b),
        }
    }

    fn hash_into(&self, state: &mut FxHasher) {
        match self {
            PropertyValue::Text(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            PropertyValue::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            PropertyValue::Real(r) => {
                2u8.hash(state);
                r.to_bits().hash(state);
            }
            PropertyValue::Boolean(b) => {
                3u8.hash(state);
                b.hash(state);
            }
        }
    }
}

/// A named property set of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySetSource {
    pub name: String,
    pub properties: Vec<(String, PropertyValue)>,
}

impl PropertySetSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.push((name.into(), value));
        self
    }
}

/// Fingerprint of property set names and values, used to decide whether
/// instances of a type carry the same properties.
pub fn property_fingerprint<'a>(sets: impl IntoIterator<Item = &'a PropertySetSource>) -> u64 {
    let mut hasher = FxHasher::default();
    let mut count = 0usize;
    for set in sets {
        set.name.hash(&mut hasher);
        set.properties.len().hash(&mut hasher);
        for (name, value) in &set.properties {
            name.hash(&mut hasher);
            value.hash_into(&mut hasher);
        }
        count += 1;
    }
    count.hash(&mut hasher);
    hasher.finish()
}

/// An opening cut into its host element.
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningSource {
    pub id: ElementId,
    pub name: Option<String>,
    /// Placement relative to the host element.
    pub transform: Matrix4<f64>,
    pub geometry: Vec<GeometryPrimitive>,
}

impl OpeningSource {
    pub fn new(id: ElementId, geometry: Vec<GeometryPrimitive>) -> Self {
        Self {
            id,
            name: None,
            transform: Matrix4::identity(),
            geometry,
        }
    }
}

/// One element of the host model.
pub trait ModelElement {
    fn id(&self) -> ElementId;

    fn name(&self) -> Option<&str> {
        None
    }

    /// Host category used for exporter dispatch, e.g. `"Walls"`.
    fn category(&self) -> &str;

    fn export_type(&self) -> ExportType;

    /// Owning level; `INVALID` when the element has none.
    fn level_id(&self) -> ElementId;

    /// World transform of the element.
    fn transform(&self) -> Matrix4<f64> {
        Matrix4::identity()
    }

    fn containment_override(&self) -> Option<ContainmentOverride> {
        None
    }

    fn group(&self) -> Option<GroupMembership> {
        None
    }

    fn assembly(&self) -> Option<AssemblyMembership> {
        None
    }

    /// Type object the element instantiates, `INVALID` when untyped.
    fn type_id(&self) -> ElementId {
        ElementId::INVALID
    }

    fn material_id(&self) -> Option<ElementId> {
        None
    }

    fn property_sets(&self) -> &[PropertySetSource] {
        &[]
    }

    fn openings(&self) -> &[OpeningSource] {
        &[]
    }

    /// Geometry stream. It may be computed lazily and is not restartable.
    fn geometry(&self) -> Box<dyn Iterator<Item = GeometryPrimitive> + '_>;

    /// Reuse key for the body geometry. Assembly membership takes precedence.
    fn body_group_key(&self) -> Option<BodyGroupKey> {
        self.assembly()
            .and_then(|a| a.body_group_key())
            .or_else(|| self.group().and_then(|g| g.body_group_key()))
    }
}

/// In-memory [`ModelElement`].
pub struct ElementRecord {
    pub id: ElementId,
    pub name: Option<String>,
    pub category: String,
    pub export_type: ExportType,
    pub level_id: ElementId,
    pub transform: Matrix4<f64>,
    pub containment_override: Option<ContainmentOverride>,
    pub group: Option<GroupMembership>,
    pub assembly: Option<AssemblyMembership>,
    pub type_id: ElementId,
    pub material_id: Option<ElementId>,
    pub property_sets: Vec<PropertySetSource>,
    pub openings: Vec<OpeningSource>,
    geometry: Cell<Option<Vec<GeometryPrimitive>>>,
    geometry_requests: Cell<usize>,
}

impl std::fmt::Debug for ElementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementRecord")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("export_type", &self.export_type)
            .field("level_id", &self.level_id)
            .finish_non_exhaustive()
    }
}

impl ElementRecord {
    pub fn new(
        id: impl Into<ElementId>,
        category: impl Into<String>,
        export_type: impl Into<ExportType>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            category: category.into(),
            export_type: export_type.into(),
            level_id: ElementId::INVALID,
            transform: Matrix4::identity(),
            containment_override: None,
            group: None,
            assembly: None,
            type_id: ElementId::INVALID,
            material_id: None,
            property_sets: Vec::new(),
            openings: Vec::new(),
            geometry: Cell::new(None),
            geometry_requests: Cell::new(0),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_level(mut self, level_id: impl Into<ElementId>) -> Self {
        self.level_id = level_id.into();
        self
    }

    pub fn with_transform(mut self, transform: Matrix4<f64>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_override(mut self, containment: ContainmentOverride) -> Self {
        self.containment_override = Some(containment);
        self
    }

    pub fn in_group(mut self, membership: GroupMembership) -> Self {
        self.group = Some(membership);
        self
    }

    pub fn in_assembly(mut self, membership: AssemblyMembership) -> Self {
        self.assembly = Some(membership);
        self
    }

    pub fn of_type(mut self, type_id: impl Into<ElementId>) -> Self {
        self.type_id = type_id.into();
        self
    }

    pub fn with_material(mut self, material_id: impl Into<ElementId>) -> Self {
        self.material_id = Some(material_id.into());
        self
    }

    pub fn with_property_set(mut self, set: PropertySetSource) -> Self {
        self.property_sets.push(set);
        self
    }

    pub fn with_opening(mut self, opening: OpeningSource) -> Self {
        self.openings.push(opening);
        self
    }

    pub fn with_geometry(self, primitives: Vec<GeometryPrimitive>) -> Self {
        self.geometry.set(Some(primitives));
        self
    }

    /// How many times the geometry stream was requested.
    pub fn geometry_requests(&self) -> usize {
        self.geometry_requests.get()
    }
}

impl ModelElement for ElementRecord {
    fn id(&self) -> ElementId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn export_type(&self) -> ExportType {
        self.export_type.clone()
    }

    fn level_id(&self) -> ElementId {
        self.level_id
    }

    fn transform(&self) -> Matrix4<f64> {
        self.transform
    }

    fn containment_override(&self) -> Option<ContainmentOverride> {
        self.containment_override
    }

    fn group(&self) -> Option<GroupMembership> {
        self.group.clone()
    }

    fn assembly(&self) -> Option<AssemblyMembership> {
        self.assembly
    }

    fn type_id(&self) -> ElementId {
        self.type_id
    }

    fn material_id(&self) -> Option<ElementId> {
        self.material_id
    }

    fn property_sets(&self) -> &[PropertySetSource] {
        &self.property_sets
    }

    fn openings(&self) -> &[OpeningSource] {
        &self.openings
    }

    /// Hands out the stored primitives once; later calls yield nothing.
    fn geometry(&self) -> Box<dyn Iterator<Item = GeometryPrimitive> + '_> {
        self.geometry_requests.set(self.geometry_requests.get() + 1);
        Box::new(self.geometry.take().unwrap_or_default().into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pset(value: f64) -> PropertySetSource {
        PropertySetSource::new("Pset_WallCommon")
            .with("IsExternal", PropertyValue::Boolean(true))
            .with("ThermalTransmittance", PropertyValue::Real(value))
    }

    #[test]
    fn fingerprint_tracks_values() {
        assert_eq!(property_fingerprint(&[pset(0.3)]), property_fingerprint(&[pset(0.3)]));
        assert_ne!(property_fingerprint(&[pset(0.3)]), property_fingerprint(&[pset(0.4)]));
        assert_ne!(
            property_fingerprint(std::iter::empty()),
            property_fingerprint(&[pset(0.3)])
        );
    }

    #[test]
    fn reuse_key_requires_unmodified_typed_member() {
        let typed = GroupMembership::new(ElementId::new(1), ElementId::new(2), 0);
        assert_eq!(typed.body_group_key(), Some(BodyGroupKey::new(ElementId::new(2), 0)));
        assert_eq!(typed.clone().modified().body_group_key(), None);

        let adhoc = GroupMembership::new(ElementId::new(1), ElementId::INVALID, 0);
        assert_eq!(adhoc.body_group_key(), None);
    }

    #[test]
    fn assembly_key_takes_precedence() {
        let record = ElementRecord::new(5, "Walls", EntityKind::IfcWall)
            .in_group(GroupMembership::new(ElementId::new(1), ElementId::new(2), 0))
            .in_assembly(AssemblyMembership::new(ElementId::new(3), ElementId::new(4), 1));
        assert_eq!(
            record.body_group_key(),
            Some(BodyGroupKey::new(ElementId::new(4), 1))
        );
    }

    #[test]
    fn geometry_stream_is_not_restartable() {
        let record = ElementRecord::new(1, "Walls", EntityKind::IfcWall).with_geometry(vec![
            GeometryPrimitive::Extrusion {
                profile: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
                depth: 3.0,
            },
        ]);
        assert_eq!(record.geometry().count(), 1);
        assert_eq!(record.geometry().count(), 0);
        assert_eq!(record.geometry_requests(), 2);
    }
}
