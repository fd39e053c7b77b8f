// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC-Lite Export Core
//!
//! Coordinates exporting a host building model into a graph of IFC entity
//! instances: admission by exclude list and exchange profile, placement and
//! spatial containment, geometry reuse for repeated group and assembly
//! members, transactional instance creation, and end-of-session relationship
//! emission.
//!
//! Writing the committed instances to a STEP file is left to the caller; see
//! [`OutputDocument`].

pub mod admission;
pub mod cache;
pub mod collector;
pub mod config;
pub mod document;
pub mod element;
pub mod emitter;
pub mod entity;
pub mod error;
pub mod exporter;
pub mod geometry;
pub mod ids;
pub mod placement;
pub mod registry;
pub mod session;
pub mod transaction;

pub use admission::{AdmissionFilter, CertificationTable, CertifiedEntityPsetList, ExcludeList, Rejection};
pub use cache::{BodyGroupData, CacheLookup, CacheStats, GeometryGroupCache};
pub use collector::ProductCollector;
pub use config::ExportConfig;
pub use document::{AttributeValue, Handle, Instance, InstanceArena, Mark, OutputDocument};
pub use element::{
    property_fingerprint, AssemblyMembership, ElementRecord, GroupMembership, ModelElement,
    OpeningSource, PropertySetSource, PropertyValue,
};
pub use emitter::{EmissionLedger, PlannedRelationship, RelationshipEmitter, RelationshipKey, RelationshipPlan};
pub use entity::{EntityKind, ExportType};
pub use error::{Error, Result, SkipReason};
pub use exporter::{export_generic_product, ElementContext, ExportFn, ExporterTable};
pub use geometry::{GeometryPrimitive, RepresentationBuilder, Tessellation};
pub use ids::{BodyGroupKey, ElementId, GlobalId};
pub use placement::{ContainmentOverride, LevelInfo, LevelTable, PlacementResolver, PlacementScope};
pub use registry::{AssemblyInstanceInfo, GroupInfo, HandleRegistry, TypePropertyInfo};
pub use session::{ExportSession, ExportStage, ExportStats, ExportSummary};
pub use transaction::BuildTransaction;

// Re-export nalgebra types used in the public API
pub use nalgebra::{Matrix4, Vector3};
