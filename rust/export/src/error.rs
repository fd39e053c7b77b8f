// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the export core.
//!
//! [`Error`] is the crate-wide error. [`SkipReason`] is what
//! [`ExportSession::export_element`](crate::ExportSession::export_element)
//! reports when one element is left out of the output; it never aborts the
//! session.

use thiserror::Error;

use crate::admission::Rejection;
use crate::document::Handle;
use crate::entity::{EntityKind, ExportType};
use crate::ids::ElementId;

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting.
#[derive(Debug, Error)]
pub enum Error {
    /// The element produced no usable geometry.
    #[error("element {0} has no usable geometric representation")]
    GeometryUnavailable(ElementId),

    /// A containment override named a container that cannot be resolved.
    #[error("containment override of element {element} targets unresolved container {container}")]
    ContainmentOverrideInvalid {
        element: ElementId,
        container: ElementId,
    },

    /// The element's owning level was never registered with the session.
    #[error("element {element} references unknown level {level}")]
    UnknownLevel { element: ElementId, level: ElementId },

    /// No exporter is registered for the element's category and entity kind.
    #[error("no exporter registered for category '{category}' as {entity}")]
    NoExporter { category: String, entity: EntityKind },

    /// A level was registered with the invalid sentinel id.
    #[error("level id {0} is not a valid element id")]
    InvalidLevelId(ElementId),

    /// The session has finished and its registries are frozen.
    #[error("export session already finished")]
    SessionFinished,

    /// A relationship references a handle that is not in the document.
    /// Fatal: this means a core invariant was broken.
    #[error("relationship {relationship} references dangling handle {handle:?}")]
    DanglingHandle {
        relationship: String,
        handle: Handle,
    },

    /// An entity name that is not part of the known schema subset.
    #[error("unknown IFC entity: {0}")]
    UnknownEntity(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed JSON configuration input.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why an element was left out of the output.
///
/// Every skip leaves the output document and all registries exactly as they
/// were before the element was attempted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    /// Rejected by the exclude list or the exchange profile.
    #[error("{export_type} not admitted: {rejection}")]
    AdmissionRejected {
        export_type: ExportType,
        rejection: Rejection,
    },

    /// The element produced no usable geometric representation.
    #[error("no usable geometry")]
    GeometryUnavailable,

    /// The containment override could not be resolved.
    #[error("containment override targets unresolved container {container}")]
    ContainmentOverrideInvalid { container: ElementId },

    /// The owning level is unknown to the session.
    #[error("unknown level {level}")]
    UnknownLevel { level: ElementId },

    /// No exporter handles this category and entity kind.
    #[error("no exporter for category '{category}' as {entity}")]
    NoExporter { category: String, entity: EntityKind },

    /// The element was already exported in this session.
    #[error("already exported")]
    AlreadyExported,

    /// The session has finished; no more elements are accepted.
    #[error("export session already finished")]
    SessionFinished,

    /// Any other per-element failure.
    #[error("export failed: {0}")]
    Failed(String),
}

impl SkipReason {
    /// Returns `true` for silent skips that are not failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SkipReason::AdmissionRejected { .. } | SkipReason::AlreadyExported
        )
    }

    /// Returns `true` when the exclude list, not certification, rejected the element.
    pub fn is_excluded(&self) -> bool {
        matches!(
            self,
            SkipReason::AdmissionRejected {
                rejection: Rejection::Excluded,
                ..
            }
        )
    }

    /// Short stable name, used as the key in skip statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::AdmissionRejected { .. } => "admission_rejected",
            SkipReason::GeometryUnavailable => "geometry_unavailable",
            SkipReason::ContainmentOverrideInvalid { .. } => "containment_override_invalid",
            SkipReason::UnknownLevel { .. } => "unknown_level",
            SkipReason::NoExporter { .. } => "no_exporter",
            SkipReason::AlreadyExported => "already_exported",
            SkipReason::SessionFinished => "session_finished",
            SkipReason::Failed(_) => "failed",
        }
    }
}

impl From<Error> for SkipReason {
    fn from(err: Error) -> Self {
        match err {
            Error::GeometryUnavailable(_) => SkipReason::GeometryUnavailable,
            Error::ContainmentOverrideInvalid { container, .. } => {
                SkipReason::ContainmentOverrideInvalid { container }
            }
            Error::UnknownLevel { level, .. } => SkipReason::UnknownLevel { level },
            Error::NoExporter { category, entity } => SkipReason::NoExporter { category, entity },
            Error::SessionFinished => SkipReason::SessionFinished,
            other => SkipReason::Failed(other.to_string()),
        }
    }
}
