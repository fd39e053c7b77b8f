// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export session: sequences admission, placement, geometry reuse and
//! registration for each element, then emits relationships once at the end.
//!
//! ```
//! use ifc_lite_export::{
//!     ElementId, ElementRecord, EntityKind, ExportConfig, ExportSession, GeometryPrimitive,
//!     InstanceArena, ProductCollector,
//! };
//!
//! let mut session = ExportSession::new(InstanceArena::new(), ExportConfig::default());
//! session.register_level(ElementId::new(1), "Ground Floor", 0.0).unwrap();
//!
//! let mut products = ProductCollector::new();
//! let wall = ElementRecord::new(100, "Walls", EntityKind::IfcWall)
//!     .on_level(1)
//!     .with_geometry(vec![GeometryPrimitive::Extrusion {
//!         profile: vec![[0.0, 0.0], [5.0, 0.0], [5.0, 0.2], [0.0, 0.2]],
//!         depth: 3.0,
//!     }]);
//! session.export_element(&wall, &mut products).unwrap();
//!
//! let summary = session.finish(&products).unwrap();
//! assert_eq!(summary.stats.exported, 1);
//! assert_eq!(session.document().count_of(EntityKind::IfcRelContainedInSpatialStructure), 1);
//! ```

use std::collections::BTreeMap;

use nalgebra::{Matrix4, Vector3};
use serde::Serialize;

use crate::admission::{AdmissionFilter, CertificationTable};
use crate::cache::{CacheStats, GeometryGroupCache};
use crate::collector::ProductCollector;
use crate::config::ExportConfig;
use crate::document::{AttributeValue, Handle, Instance, InstanceArena, OutputDocument};
use crate::element::ModelElement;
use crate::emitter::{EmissionLedger, RelationshipEmitter};
use crate::entity::{EntityKind, ExportType};
use crate::error::{Error, Result, SkipReason};
use crate::exporter::{ElementContext, ExporterTable, StagedElement, StagedTypeProperty};
use crate::geometry::RepresentationBuilder;
use crate::ids::ElementId;
use crate::placement::{local_placement, LevelInfo, LevelTable, PlacementResolver};
use crate::registry::HandleRegistry;
use crate::transaction::BuildTransaction;

/// Stage of the element currently being exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Filtering,
    Rejected,
    PlacementResolved,
    GeometryResolved { cache_hit: bool },
    InstanceCreated,
    Committed,
    /// Registry, cache and collector updates applied.
    Registered,
}

/// Session counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportStats {
    pub exported: usize,
    /// Skipped elements by [`SkipReason::kind`].
    pub skipped: BTreeMap<&'static str, usize>,
    /// Calls into the host geometry stream.
    pub geometry_constructions: usize,
    pub cache_hits: usize,
    pub cache_invalidations: usize,
    pub openings: usize,
}

impl ExportStats {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, kind: &str) -> usize {
        self.skipped.get(kind).copied().unwrap_or(0)
    }

    fn record_skip(&mut self, reason: &SkipReason) {
        *self.skipped.entry(reason.kind()).or_default() += 1;
    }
}

/// Result of [`ExportSession::finish`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub stats: ExportStats,
    /// Relationship instances written by this call.
    pub relationships: usize,
    /// Types whose property sets were moved onto the type object.
    pub types_assigned: usize,
}

/// One export run over a host model.
pub struct ExportSession<D: OutputDocument = InstanceArena> {
    document: D,
    config: ExportConfig,
    admission: AdmissionFilter,
    builder: RepresentationBuilder,
    cache: GeometryGroupCache,
    registry: HandleRegistry,
    levels: LevelTable,
    exporters: ExporterTable<D>,
    ledger: EmissionLedger,
    stats: ExportStats,
    finished: bool,
}

impl<D: OutputDocument> ExportSession<D> {
    /// Creates a session writing into `document`, using the generic exporter
    /// for every category.
    pub fn new(document: D, config: ExportConfig) -> Self {
        let admission = config.admission_filter();
        let builder = RepresentationBuilder::new(config.tessellation);
        Self {
            document,
            config,
            admission,
            builder,
            cache: GeometryGroupCache::new(),
            registry: HandleRegistry::new(),
            levels: LevelTable::new(),
            exporters: ExporterTable::with_generic(),
            ledger: EmissionLedger::new(),
            stats: ExportStats::default(),
            finished: false,
        }
    }

    /// Installs the certification table for exchange-profile checks.
    pub fn with_certification(mut self, table: CertificationTable) -> Self {
        self.admission = self.admission.with_certification(table);
        self
    }

    pub fn with_exporters(mut self, exporters: ExporterTable<D>) -> Self {
        self.exporters = exporters;
        self
    }

    /// Creates a building storey with its placement and makes it available
    /// as an owning level and containment target.
    pub fn register_level(
        &mut self,
        level_id: ElementId,
        name: &str,
        elevation: f64,
    ) -> Result<Handle> {
        if self.finished {
            return Err(Error::SessionFinished);
        }
        if !level_id.is_valid() {
            return Err(Error::InvalidLevelId(level_id));
        }

        let mut tx = BuildTransaction::begin(&mut self.document);
        let placement = local_placement(
            &mut tx,
            None,
            &Matrix4::new_translation(&Vector3::new(0.0, 0.0, elevation)),
        );
        let global_id = tx.new_global_id();
        let storey = tx.create(
            Instance::new(EntityKind::IfcBuildingStorey)
                .with_global_id(global_id)
                .with_text("Name", Some(name))
                .with("ObjectPlacement", AttributeValue::Ref(placement))
                .with("CompositionType", AttributeValue::Enum("ELEMENT".into()))
                .with("Elevation", AttributeValue::Real(elevation)),
        );
        tx.commit();

        self.registry.register(level_id, storey);
        if self
            .levels
            .insert(LevelInfo {
                level_id,
                name: name.to_string(),
                storey,
                placement,
                elevation,
            })
            .is_some()
        {
            tracing::warn!(level = %level_id, "level registered twice, replacing");
        }
        tracing::debug!(level = %level_id, name, elevation, "registered level");
        Ok(storey)
    }

    /// Exports a type object so its instances' shared property sets can be
    /// assigned to it.
    pub fn export_type_object(
        &mut self,
        type_id: ElementId,
        export_type: ExportType,
        name: Option<&str>,
    ) -> std::result::Result<Handle, SkipReason> {
        if self.finished {
            return Err(SkipReason::SessionFinished);
        }
        if !export_type.entity.is_type_object() {
            return Err(SkipReason::Failed(format!(
                "{} is not a type object",
                export_type.entity
            )));
        }
        self.admission
            .check(&export_type)
            .map_err(|rejection| SkipReason::AdmissionRejected {
                export_type: export_type.clone(),
                rejection,
            })?;

        let mut tx = BuildTransaction::begin(&mut self.document);
        let global_id = tx.new_global_id();
        let handle = tx.create(
            Instance::new(export_type.entity)
                .with_global_id(global_id)
                .with_text("Name", name)
                .with("Tag", AttributeValue::String(type_id.to_string()))
                .with(
                    "PredefinedType",
                    export_type
                        .predefined_type
                        .map_or(AttributeValue::Null, AttributeValue::Enum),
                ),
        );
        tx.commit();
        self.registry.register(type_id, handle);
        Ok(handle)
    }

    /// Exports one element.
    ///
    /// On any skip the document, registries, cache and collector are left
    /// exactly as they were before the call. An element already exported in
    /// this session is skipped with [`SkipReason::AlreadyExported`].
    pub fn export_element(
        &mut self,
        element: &dyn ModelElement,
        collector: &mut ProductCollector,
    ) -> std::result::Result<(), SkipReason> {
        let span = tracing::debug_span!(
            "export_element",
            element = %element.id(),
            category = element.category()
        );
        let _enter = span.enter();

        let mut staged = StagedElement::default();
        let result = self.try_export(element, collector, &mut staged);

        self.stats.geometry_constructions += staged.geometry_constructions;
        self.stats.cache_hits += staged.cache_hits;
        match &result {
            Ok(()) => self.stats.exported += 1,
            Err(reason) => {
                self.stats.record_skip(reason);
                if reason.is_rejection() {
                    tracing::debug!(%reason, "element not exported");
                } else {
                    tracing::warn!(%reason, stage = ?staged.stage, "element skipped");
                }
            }
        }
        result
    }

    fn try_export(
        &mut self,
        element: &dyn ModelElement,
        collector: &mut ProductCollector,
        staged: &mut StagedElement,
    ) -> std::result::Result<(), SkipReason> {
        let Self {
            document,
            config,
            admission,
            builder,
            cache,
            registry,
            levels,
            exporters,
            stats,
            finished,
            ..
        } = self;
        if *finished {
            return Err(SkipReason::SessionFinished);
        }

        staged.advance(ExportStage::Filtering);
        let export_type = element.export_type();
        if let Err(rejection) = admission.check(&export_type) {
            staged.advance(ExportStage::Rejected);
            return Err(SkipReason::AdmissionRejected {
                export_type,
                rejection,
            });
        }
        if registry.lookup(element.id()).is_some() {
            staged.advance(ExportStage::Rejected);
            return Err(SkipReason::AlreadyExported);
        }
        let exporter = exporters
            .resolve(element.category(), export_type.entity)
            .ok_or_else(|| SkipReason::NoExporter {
                category: element.category().to_string(),
                entity: export_type.entity,
            })?;

        let mut tx = BuildTransaction::begin(document);
        let mut scope = PlacementResolver::new(levels).resolve(
            &mut tx,
            element.id(),
            element.level_id(),
            &element.transform(),
            element.containment_override().as_ref(),
        )?;
        staged.advance(ExportStage::PlacementResolved);

        let product = {
            let mut ctx = ElementContext::new(
                &mut scope,
                cache,
                registry,
                admission,
                *builder,
                config.reuse_group_geometry,
                staged,
            );
            exporter(&mut ctx, element)?
        };
        if staged.pending_openings {
            tracing::debug!("exporter left openings pending, discarding");
            staged.pending_openings = false;
            staged.openings.clear();
        }
        let (_, level_id) = scope.commit();
        tx.commit();
        staged.advance(ExportStage::Committed);

        registry.register(element.id(), product);
        if let Some(group) = element.group() {
            registry.set_group_export_type(group.group_id, group.export_type);
            registry.add_to_group(group.group_id, product);
        }
        match element.assembly() {
            Some(assembly) => {
                registry.add_to_assembly(assembly.assembly_id, product, level_id);
            }
            None => {
                collector.add(level_id, product);
            }
        }
        match staged.type_property.take() {
            Some(StagedTypeProperty::Shared {
                type_id,
                created,
                fingerprint,
            }) => registry.add_type_property(type_id, product, &created, fingerprint),
            Some(StagedTypeProperty::Diverged { type_id }) => registry.mark_type_diverged(type_id),
            None => {}
        }
        if let Some(key) = staged.cache_invalidate.take() {
            cache.invalidate(&key);
        }
        if let Some((key, data)) = staged.cache_insert.take() {
            cache.insert(key, data);
        }
        stats.openings += staged.openings.len();
        staged.advance(ExportStage::Registered);
        Ok(())
    }

    /// Assigns property sets to the type object for every registered type
    /// whose instances all share the same values.
    fn assign_uniform_type_properties(&mut self) -> usize {
        let mut candidates: Vec<ElementId> = self
            .registry
            .type_properties()
            .iter()
            .filter(|(type_id, info)| {
                !info.assigned_to_type()
                    && info.has_uniform_values()
                    && self.registry.lookup(**type_id).is_some()
            })
            .map(|(type_id, _)| *type_id)
            .collect();
        candidates.sort_unstable();

        candidates
            .into_iter()
            .filter(|type_id| self.registry.assign_type_properties_to_type(*type_id))
            .count()
    }

    /// Finalizes type property assignment and emits every pending
    /// relationship.
    ///
    /// Finishing is terminal: later calls to [`export_element`],
    /// [`register_level`] and [`export_type_object`] are refused, so the
    /// registries are frozen. Calling `finish` again only retries
    /// relationships that were not emitted, e.g. after a failed emission.
    ///
    /// [`export_element`]: ExportSession::export_element
    /// [`register_level`]: ExportSession::register_level
    /// [`export_type_object`]: ExportSession::export_type_object
    pub fn finish(&mut self, collector: &ProductCollector) -> Result<ExportSummary> {
        self.finished = true;
        let types_assigned = self.assign_uniform_type_properties();

        let emitter = RelationshipEmitter::new(&self.admission, &self.levels);
        let plan = emitter.plan(&self.registry, collector);
        let relationships = emitter.emit(&plan, &mut self.document, &mut self.ledger)?;

        self.stats.cache_invalidations = self.cache.stats().invalidations;
        let summary = ExportSummary {
            stats: self.stats.clone(),
            relationships,
            types_assigned,
        };
        tracing::info!(
            exported = summary.stats.exported,
            skipped = summary.stats.skipped_total(),
            geometry_constructions = summary.stats.geometry_constructions,
            cache_hits = summary.stats.cache_hits,
            relationships,
            types_assigned,
            "export finished"
        );
        Ok(summary)
    }

    /// Returns `true` once [`finish`](ExportSession::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionFilter {
        &self.admission
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn levels(&self) -> &LevelTable {
        &self.levels
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Handle exported for an element, if any.
    pub fn handle_of(&self, id: ElementId) -> Option<Handle> {
        self.registry.lookup(id)
    }

    pub fn into_document(self) -> D {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementRecord;
    use crate::geometry::GeometryPrimitive;

    fn slab(id: i64) -> ElementRecord {
        ElementRecord::new(id, "Floors", EntityKind::IfcSlab)
            .on_level(1)
            .with_geometry(vec![GeometryPrimitive::Extrusion {
                profile: vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]],
                depth: 0.3,
            }])
    }

    fn session() -> ExportSession {
        let mut session =
            ExportSession::new(InstanceArena::with_sequential_ids(), ExportConfig::default());
        session.register_level(ElementId::new(1), "Level 1", 0.0).unwrap();
        session
    }

    #[test]
    fn invalid_level_id_is_refused() {
        let mut session = ExportSession::new(InstanceArena::new(), ExportConfig::default());
        assert!(matches!(
            session.register_level(ElementId::INVALID, "Nowhere", 0.0),
            Err(Error::InvalidLevelId(_))
        ));
        assert!(session.document().is_empty());
    }

    #[test]
    fn exported_element_is_registered_and_collected() {
        let mut session = session();
        let mut products = ProductCollector::new();
        session.export_element(&slab(10), &mut products).unwrap();

        let handle = session.handle_of(ElementId::new(10)).unwrap();
        assert!(session.document().contains(handle));
        assert!(products.contains(handle));
        assert_eq!(session.stats().exported, 1);
        assert_eq!(session.stats().geometry_constructions, 1);
    }

    #[test]
    fn missing_geometry_skips_without_side_effects() {
        let mut session = session();
        let mut products = ProductCollector::new();
        let before = session.document().len();

        let empty = ElementRecord::new(11, "Floors", EntityKind::IfcSlab).on_level(1);
        assert_eq!(
            session.export_element(&empty, &mut products),
            Err(SkipReason::GeometryUnavailable)
        );
        assert_eq!(session.document().len(), before);
        assert!(session.handle_of(ElementId::new(11)).is_none());
        assert!(products.is_empty());
        assert_eq!(session.stats().skipped_for("geometry_unavailable"), 1);
    }

    #[test]
    fn unknown_level_is_a_skip() {
        let mut session = session();
        let mut products = ProductCollector::new();
        let orphan = slab(12).on_level(42);
        assert_eq!(
            session.export_element(&orphan, &mut products),
            Err(SkipReason::UnknownLevel {
                level: ElementId::new(42)
            })
        );
    }

    #[test]
    fn no_exporter_is_a_skip() {
        let mut session = session().with_exporters(ExporterTable::empty());
        let mut products = ProductCollector::new();
        let err = session.export_element(&slab(13), &mut products).unwrap_err();
        assert!(matches!(err, SkipReason::NoExporter { entity: EntityKind::IfcSlab, .. }));
    }

    #[test]
    fn exclusion_is_reported_as_rejection() {
        let config = ExportConfig {
            exclude: vec!["IfcSlab".into()],
            ..ExportConfig::default()
        };
        let mut session = ExportSession::new(InstanceArena::new(), config);
        session.register_level(ElementId::new(1), "Level 1", 0.0).unwrap();
        let mut products = ProductCollector::new();
        let element = slab(14);
        let err = session.export_element(&element, &mut products).unwrap_err();
        assert!(err.is_rejection());
        assert!(err.is_excluded());
        assert_eq!(element.geometry_requests(), 0);
    }

    #[test]
    fn exporting_twice_contributes_once() {
        use crate::element::GroupMembership;

        let mut session = session();
        let mut products = ProductCollector::new();
        let element = slab(15).in_group(GroupMembership::new(
            ElementId::new(150),
            ElementId::INVALID,
            0,
        ));
        session.export_element(&element, &mut products).unwrap();
        let len = session.document().len();

        assert_eq!(
            session.export_element(&element, &mut products),
            Err(SkipReason::AlreadyExported)
        );
        assert_eq!(session.document().len(), len);
        assert_eq!(session.document().count_of(EntityKind::IfcSlab), 1);
        assert_eq!(
            session.registry().groups()[&ElementId::new(150)].member_handles.len(),
            1
        );
        assert_eq!(products.len(), 1);
        assert_eq!(session.stats().exported, 1);
        assert_eq!(session.stats().skipped_for("already_exported"), 1);
    }

    #[test]
    fn stages_end_after_registration() {
        let mut session = session();
        let mut products = ProductCollector::new();
        let mut staged = StagedElement::default();
        session.try_export(&slab(16), &mut products, &mut staged).unwrap();
        assert_eq!(staged.stage, Some(ExportStage::Registered));
        assert!(session.handle_of(ElementId::new(16)).is_some());
    }

    #[test]
    fn finish_freezes_the_session() {
        let mut session = session();
        let mut products = ProductCollector::new();
        session.export_element(&slab(17), &mut products).unwrap();
        let first = session.finish(&products).unwrap();
        assert_eq!(first.relationships, 1);
        assert!(session.is_finished());
        let len = session.document().len();

        assert_eq!(
            session.export_element(&slab(18), &mut products),
            Err(SkipReason::SessionFinished)
        );
        assert!(matches!(
            session.register_level(ElementId::new(2), "Level 2", 3.0),
            Err(Error::SessionFinished)
        ));
        assert_eq!(
            session.export_type_object(ElementId::new(500), EntityKind::IfcSlabType.into(), None),
            Err(SkipReason::SessionFinished)
        );
        assert_eq!(session.document().len(), len);
        assert!(products.contains(session.handle_of(ElementId::new(17)).unwrap()));
        assert!(session.handle_of(ElementId::new(18)).is_none());

        let second = session.finish(&products).unwrap();
        assert_eq!(second.relationships, 0);
        assert_eq!(second.stats.skipped_for("session_finished"), 1);
        assert_eq!(session.document().len(), len);
    }

    #[test]
    fn type_object_must_be_a_type() {
        let mut session = session();
        assert!(session
            .export_type_object(ElementId::new(500), EntityKind::IfcWall.into(), None)
            .is_err());
        let handle = session
            .export_type_object(ElementId::new(500), EntityKind::IfcWallType.into(), Some("Basic"))
            .unwrap();
        assert_eq!(session.handle_of(ElementId::new(500)), Some(handle));
    }
}
