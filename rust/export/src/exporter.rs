// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-category exporters and the context they build elements in.
//!
//! An exporter receives an [`ElementContext`] wrapping the element's
//! placement scope. Everything it creates through the context is rolled back
//! if it returns an error. Registrations, cache inserts and type property
//! bookkeeping are only staged here; the session applies them after the
//! element's scope has committed.

use nalgebra::Vector3;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::admission::AdmissionFilter;
use crate::cache::{BodyGroupData, CacheLookup, GeometryGroupCache};
use crate::document::{AttributeValue, Handle, Instance, OutputDocument};
use crate::element::{property_fingerprint, ModelElement, PropertySetSource};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::geometry::RepresentationBuilder;
use crate::ids::{BodyGroupKey, ElementId};
use crate::placement::{local_placement, PlacementScope};
use crate::registry::HandleRegistry;
use crate::session::ExportStage;
use crate::transaction::BuildTransaction;

/// Type property bookkeeping staged for after commit.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StagedTypeProperty {
    /// The element uses the type's shared property sets. `created` holds the
    /// sets it created when it was the first instance.
    Shared {
        type_id: ElementId,
        created: Vec<Handle>,
        fingerprint: u64,
    },
    /// The element carries its own values.
    Diverged { type_id: ElementId },
}

/// Side effects of one element, applied only once its scope commits.
#[derive(Debug, Default)]
pub(crate) struct StagedElement {
    pub(crate) stage: Option<ExportStage>,
    pub(crate) cache_insert: Option<(BodyGroupKey, BodyGroupData)>,
    pub(crate) cache_invalidate: Option<BodyGroupKey>,
    pub(crate) type_property: Option<StagedTypeProperty>,
    pub(crate) openings: Vec<Handle>,
    pub(crate) pending_openings: bool,
    pub(crate) geometry_constructions: usize,
    pub(crate) cache_hits: usize,
}

impl StagedElement {
    pub(crate) fn advance(&mut self, stage: ExportStage) {
        tracing::trace!(?stage, "export stage");
        self.stage = Some(stage);
    }
}

/// Build context handed to exporters.
pub struct ElementContext<'c, 'p, D: OutputDocument> {
    scope: &'c mut PlacementScope<'p, D>,
    cache: &'c mut GeometryGroupCache,
    registry: &'c HandleRegistry,
    admission: &'c AdmissionFilter,
    builder: RepresentationBuilder,
    reuse_group_geometry: bool,
    staged: &'c mut StagedElement,
}

impl<'c, 'p, D: OutputDocument> ElementContext<'c, 'p, D> {
    pub(crate) fn new(
        scope: &'c mut PlacementScope<'p, D>,
        cache: &'c mut GeometryGroupCache,
        registry: &'c HandleRegistry,
        admission: &'c AdmissionFilter,
        builder: RepresentationBuilder,
        reuse_group_geometry: bool,
        staged: &'c mut StagedElement,
    ) -> Self {
        Self {
            scope,
            cache,
            registry,
            admission,
            builder,
            reuse_group_geometry,
            staged,
        }
    }

    /// The element's `IfcLocalPlacement`.
    pub fn placement(&self) -> Handle {
        self.scope.placement()
    }

    /// Level that will contain the element.
    pub fn level_id(&self) -> ElementId {
        self.scope.level_id()
    }

    /// The element's build scope, for exporters creating extra instances.
    pub fn transaction(&mut self) -> &mut BuildTransaction<'p, D> {
        self.scope.transaction()
    }

    pub fn set_extrusion_axis(&mut self, axis: Vector3<f64>) {
        self.scope.set_extrusion_axis(axis);
    }

    /// Returns the element's body representations, reusing cached ones for
    /// unmodified group and assembly members.
    ///
    /// Fails with [`Error::GeometryUnavailable`] when nothing usable was built.
    pub fn body_representation(
        &mut self,
        element: &dyn ModelElement,
    ) -> Result<SmallVec<[Handle; 2]>> {
        let material = element.material_id();
        let key = if self.reuse_group_geometry {
            element.body_group_key()
        } else {
            None
        };

        if let Some(key) = key {
            match self.cache.lookup_for(&key, material) {
                CacheLookup::Hit(data) => {
                    self.staged.cache_hits += 1;
                    self.staged.advance(ExportStage::GeometryResolved { cache_hit: true });
                    return Ok(data.handles().iter().copied().collect());
                }
                CacheLookup::Mismatch => self.staged.cache_invalidate = Some(key),
                CacheLookup::Miss => {}
            }
        }

        self.staged.geometry_constructions += 1;
        let axis = *self.scope.extrusion_axis();
        let representations = self
            .builder
            .build(self.scope.transaction(), element.geometry(), &axis);
        if representations.is_empty() {
            return Err(Error::GeometryUnavailable(element.id()));
        }

        let cacheable = |k: &BodyGroupKey| {
            !self.cache.is_poisoned(k) && self.staged.cache_invalidate != Some(*k)
        };
        if let Some(key) = key.filter(cacheable) {
            self.staged.cache_insert = Some((
                key,
                BodyGroupData::new(representations.iter().copied(), material),
            ));
        }
        self.staged.advance(ExportStage::GeometryResolved { cache_hit: false });
        Ok(representations)
    }

    /// Wraps shape representations in an `IfcProductDefinitionShape`.
    pub fn product_shape(&mut self, representations: &[Handle]) -> Handle {
        product_definition_shape(self.scope.transaction(), representations)
    }

    /// Creates the product instance for the element at its resolved placement.
    pub fn create_product(&mut self, element: &dyn ModelElement, shape: Option<Handle>) -> Handle {
        let export_type = element.export_type();
        let placement = self.scope.placement();
        let tx = self.scope.transaction();
        let global_id = tx.new_global_id();
        let handle = tx.create(
            Instance::new(export_type.entity)
                .with_global_id(global_id)
                .with_text("Name", element.name())
                .with("ObjectPlacement", AttributeValue::Ref(placement))
                .with(
                    "Representation",
                    shape.map_or(AttributeValue::Null, AttributeValue::Ref),
                )
                .with("Tag", AttributeValue::String(element.id().to_string()))
                .with(
                    "PredefinedType",
                    export_type
                        .predefined_type
                        .map_or(AttributeValue::Null, AttributeValue::Enum),
                ),
        );
        self.staged.advance(ExportStage::InstanceCreated);
        handle
    }

    /// Marks that openings will be created for the element.
    pub fn begin_openings(&mut self) {
        self.staged.pending_openings = true;
    }

    /// Drops pending opening state after the host failed.
    pub fn clear_openings(&mut self) {
        self.staged.pending_openings = false;
        self.staged.openings.clear();
    }

    /// Creates the element's openings and their `IfcRelVoidsElement`.
    ///
    /// Each opening is built in its own nested scope; one without usable
    /// geometry is left out without affecting the host. Returns the number
    /// of openings created.
    pub fn finish_openings(&mut self, element: &dyn ModelElement, host: Handle) -> usize {
        self.staged.pending_openings = false;
        if element.openings().is_empty() {
            return 0;
        }
        if !self.admission.admits(&EntityKind::IfcOpeningElement.into()) {
            tracing::debug!(element = %element.id(), "openings not admitted");
            return 0;
        }

        let host_placement = self.scope.placement();
        let builder = self.builder;
        let mut created = 0;
        for opening in element.openings() {
            let mut tx = self.scope.transaction().nested();
            let representations = builder.build(&mut tx, opening.geometry.iter().cloned(), &Vector3::z());
            if representations.is_empty() {
                tracing::warn!(
                    element = %element.id(),
                    opening = %opening.id,
                    "opening has no usable geometry, skipped"
                );
                continue;
            }

            let placement = local_placement(&mut tx, Some(host_placement), &opening.transform);
            let shape = product_definition_shape(&mut tx, &representations);
            let global_id = tx.new_global_id();
            let opening_handle = tx.create(
                Instance::new(EntityKind::IfcOpeningElement)
                    .with_global_id(global_id)
                    .with_text("Name", opening.name.as_deref())
                    .with("ObjectPlacement", AttributeValue::Ref(placement))
                    .with("Representation", AttributeValue::Ref(shape))
                    .with("Tag", AttributeValue::String(opening.id.to_string())),
            );
            let global_id = tx.new_global_id();
            tx.create(
                Instance::new(EntityKind::IfcRelVoidsElement)
                    .with_global_id(global_id)
                    .with("RelatingBuildingElement", AttributeValue::Ref(host))
                    .with("RelatedOpeningElement", AttributeValue::Ref(opening_handle)),
            );
            tx.commit();

            self.staged.openings.push(opening_handle);
            created += 1;
        }
        created
    }

    /// Creates or reuses the element's admitted property sets.
    ///
    /// Instances of a type share the property sets created by the first
    /// instance as long as their values match; those are related once the
    /// session finishes. Untyped elements and instances with diverging values
    /// get their own sets, related to the product right away.
    pub fn property_sets(&mut self, element: &dyn ModelElement, product: Handle) -> Vec<Handle> {
        let admitted: Vec<&PropertySetSource> = element
            .property_sets()
            .iter()
            .filter(|set| {
                let allowed = self.admission.admits_pset(&set.name);
                if !allowed {
                    tracing::debug!(pset = %set.name, "property set not certified, skipped");
                }
                allowed
            })
            .collect();
        if admitted.is_empty() {
            return Vec::new();
        }

        let fingerprint = property_fingerprint(admitted.iter().copied());
        let type_id = element.type_id();
        if type_id.is_valid() {
            let registry = self.registry;
            match registry.type_properties().get(&type_id) {
                Some(info) if info.fingerprint() == Some(fingerprint) => {
                    self.staged.type_property = Some(StagedTypeProperty::Shared {
                        type_id,
                        created: Vec::new(),
                        fingerprint,
                    });
                    return info.property_set_handles.iter().copied().collect();
                }
                None => {
                    let created = self.create_property_sets(&admitted);
                    self.staged.type_property = Some(StagedTypeProperty::Shared {
                        type_id,
                        created: created.clone(),
                        fingerprint,
                    });
                    return created;
                }
                Some(_) => {
                    self.staged.type_property = Some(StagedTypeProperty::Diverged { type_id });
                }
            }
        }

        let created = self.create_property_sets(&admitted);
        let tx = self.scope.transaction();
        for &pset in &created {
            let global_id = tx.new_global_id();
            tx.create(
                Instance::new(EntityKind::IfcRelDefinesByProperties)
                    .with_global_id(global_id)
                    .with("RelatedObjects", AttributeValue::refs([product]))
                    .with("RelatingPropertyDefinition", AttributeValue::Ref(pset)),
            );
        }
        created
    }

    fn create_property_sets(&mut self, sets: &[&PropertySetSource]) -> Vec<Handle> {
        let tx = self.scope.transaction();
        let mut handles = Vec::with_capacity(sets.len());
        for set in sets {
            let properties: Vec<Handle> = set
                .properties
                .iter()
                .map(|(name, value)| {
                    tx.create(
                        Instance::new(EntityKind::IfcPropertySingleValue)
                            .with("Name", AttributeValue::String(name.clone()))
                            .with("Description", AttributeValue::Null)
                            .with("NominalValue", value.to_attribute())
                            .with("Unit", AttributeValue::Null),
                    )
                })
                .collect();
            let global_id = tx.new_global_id();
            handles.push(tx.create(
                Instance::new(EntityKind::IfcPropertySet)
                    .with_global_id(global_id)
                    .with("Name", AttributeValue::String(set.name.clone()))
                    .with("Description", AttributeValue::Null)
                    .with("HasProperties", AttributeValue::refs(properties)),
            ));
        }
        handles
    }
}

fn product_definition_shape<D: OutputDocument>(
    tx: &mut BuildTransaction<'_, D>,
    representations: &[Handle],
) -> Handle {
    tx.create(
        Instance::new(EntityKind::IfcProductDefinitionShape)
            .with("Name", AttributeValue::Null)
            .with("Description", AttributeValue::Null)
            .with(
                "Representations",
                AttributeValue::refs(representations.iter().copied()),
            ),
    )
}

/// Exporter entry point. Returns the element's product handle.
pub type ExportFn<D> = fn(&mut ElementContext<'_, '_, D>, &dyn ModelElement) -> Result<Handle>;

/// Generic exporter: body geometry, product, property sets and openings.
pub fn export_generic_product<D: OutputDocument>(
    ctx: &mut ElementContext<'_, '_, D>,
    element: &dyn ModelElement,
) -> Result<Handle> {
    ctx.begin_openings();
    let representations = match ctx.body_representation(element) {
        Ok(representations) => representations,
        Err(e) => {
            ctx.clear_openings();
            return Err(e);
        }
    };
    let shape = ctx.product_shape(&representations);
    let product = ctx.create_product(element, Some(shape));
    ctx.property_sets(element, product);
    ctx.finish_openings(element, product);
    Ok(product)
}

/// Dispatch table from host category and entity kind to exporter.
///
/// Lookup order: exact `(category, entity)` match, then the category's
/// exporter, then the fallback.
pub struct ExporterTable<D: OutputDocument> {
    exact: FxHashMap<(String, EntityKind), ExportFn<D>>,
    by_category: FxHashMap<String, ExportFn<D>>,
    fallback: Option<ExportFn<D>>,
}

impl<D: OutputDocument> ExporterTable<D> {
    /// Table without any exporter; every element is skipped with `NoExporter`.
    pub fn empty() -> Self {
        Self {
            exact: FxHashMap::default(),
            by_category: FxHashMap::default(),
            fallback: None,
        }
    }

    /// Table falling back to [`export_generic_product`].
    pub fn with_generic() -> Self {
        Self {
            fallback: Some(export_generic_product::<D>),
            ..Self::empty()
        }
    }

    pub fn register(&mut self, category: &str, entity: EntityKind, exporter: ExportFn<D>) {
        self.exact.insert((category.to_string(), entity), exporter);
    }

    pub fn register_category(&mut self, category: &str, exporter: ExportFn<D>) {
        self.by_category.insert(category.to_string(), exporter);
    }

    pub fn set_fallback(&mut self, exporter: Option<ExportFn<D>>) {
        self.fallback = exporter;
    }

    pub fn resolve(&self, category: &str, entity: EntityKind) -> Option<ExportFn<D>> {
        self.exact
            .get(&(category.to_string(), entity))
            .or_else(|| self.by_category.get(category))
            .copied()
            .or(self.fallback)
    }
}

impl<D: OutputDocument> Default for ExporterTable<D> {
    fn default() -> Self {
        Self::with_generic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InstanceArena;

    fn no_geometry(
        _ctx: &mut ElementContext<'_, '_, InstanceArena>,
        element: &dyn ModelElement,
    ) -> Result<Handle> {
        Err(Error::GeometryUnavailable(element.id()))
    }

    #[test]
    fn dispatch_order() {
        let mut table = ExporterTable::<InstanceArena>::empty();
        assert!(table.resolve("Walls", EntityKind::IfcWall).is_none());

        table.set_fallback(Some(export_generic_product::<InstanceArena>));
        table.register_category("Walls", no_geometry);
        table.register("Walls", EntityKind::IfcCurtainWall, export_generic_product::<InstanceArena>);

        let category = table.resolve("Walls", EntityKind::IfcWall).unwrap();
        assert_eq!(category as usize, no_geometry as ExportFn<InstanceArena> as usize);

        let exact = table.resolve("Walls", EntityKind::IfcCurtainWall).unwrap();
        assert_eq!(
            exact as usize,
            export_generic_product::<InstanceArena> as ExportFn<InstanceArena> as usize
        );

        assert!(table.resolve("Floors", EntityKind::IfcSlab).is_some());
    }
}
