// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Admission gates deciding whether an entity may be written at all.
//!
//! Two independent gates must both pass:
//!
//! 1. The **exclude list**: entity kinds (optionally narrowed to one
//!    predefined type) the user asked to leave out.
//! 2. The **certification table**: per exchange profile (MVD), the entity
//!    and property set names certified for that profile.
//!
//! An empty name set in a certification entry means "no restriction
//! configured" and admits everything. A missing table or a missing profile
//! entry admits everything too.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, ExportType};
use crate::error::Result;

/// Why the admission filter turned an entity away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("excluded by configuration")]
    Excluded,

    #[error("not certified for exchange profile '{profile}'")]
    NotCertified { profile: String },
}

/// Entity kinds the user excluded from export.
#[derive(Debug, Clone, Default)]
pub struct ExcludeList {
    entities: FxHashSet<EntityKind>,
    predefined: FxHashSet<(EntityKind, String)>,
}

impl ExcludeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an exclude list from names like `IfcSpace` or `IfcWall.SHEAR`.
    ///
    /// Unknown names are logged and ignored.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            match name.parse::<ExportType>() {
                Ok(export_type) => list.insert(export_type),
                Err(e) => tracing::warn!(entry = name, error = %e, "ignoring exclude list entry"),
            }
        }
        list
    }

    /// Excludes an entity kind, or only one of its predefined types.
    pub fn insert(&mut self, export_type: ExportType) {
        match export_type.predefined_type {
            Some(predefined) => {
                self.predefined.insert((export_type.entity, predefined));
            }
            None => {
                self.entities.insert(export_type.entity);
            }
        }
    }

    /// Returns `true` if the export type is excluded.
    pub fn is_excluded(&self, export_type: &ExportType) -> bool {
        if self.entities.contains(&export_type.entity) {
            return true;
        }
        match &export_type.predefined_type {
            Some(predefined) => self
                .predefined
                .contains(&(export_type.entity, predefined.to_ascii_uppercase())),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.predefined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Entities and property sets certified for one exchange profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifiedEntityPsetList {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub allowed_pset_names: FxHashSet<String>,
    #[serde(default)]
    pub allowed_entity_names: FxHashSet<String>,
}

impl CertifiedEntityPsetList {
    /// Entity names compare case-insensitively. Empty set admits all.
    pub fn allows_entity(&self, entity_name: &str) -> bool {
        self.allowed_entity_names.is_empty()
            || self
                .allowed_entity_names
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(entity_name))
    }

    /// Property set names compare exactly. Empty set admits all.
    pub fn allows_pset(&self, pset_name: &str) -> bool {
        self.allowed_pset_names.is_empty() || self.allowed_pset_names.contains(pset_name)
    }
}

/// Certification lists keyed by exchange-profile name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificationTable {
    profiles: FxHashMap<String, CertifiedEntityPsetList>,
}

impl CertificationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object mapping profile names to certification lists.
    ///
    /// ```
    /// use ifc_lite_export::CertificationTable;
    ///
    /// let table = CertificationTable::from_json_str(r#"{
    ///     "IFC2x3 COBie 2.4": {
    ///         "version": "2.4",
    ///         "allowedEntityNames": ["IfcSpace", "IfcDoor"],
    ///         "allowedPsetNames": []
    ///     }
    /// }"#).unwrap();
    /// assert!(table.get("IFC2x3 COBie 2.4").is_some());
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn insert(&mut self, profile: impl Into<String>, list: CertifiedEntityPsetList) {
        self.profiles.insert(profile.into(), list);
    }

    pub fn get(&self, profile: &str) -> Option<&CertifiedEntityPsetList> {
        self.profiles.get(profile)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Combined exclude-list and certification gate for one session.
#[derive(Debug, Clone, Default)]
pub struct AdmissionFilter {
    exclude: ExcludeList,
    certification: Option<CertificationTable>,
    profile: Option<String>,
}

impl AdmissionFilter {
    pub fn new(exclude: ExcludeList, profile: Option<String>) -> Self {
        Self {
            exclude,
            certification: None,
            profile,
        }
    }

    /// Installs an already loaded certification table.
    pub fn with_certification(mut self, table: CertificationTable) -> Self {
        self.certification = Some(table);
        self
    }

    pub fn exclude_list(&self) -> &ExcludeList {
        &self.exclude
    }

    /// Active exchange profile, if any.
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    fn certified_list(&self, profile: &str) -> Option<&CertifiedEntityPsetList> {
        self.certification.as_ref()?.get(profile)
    }

    /// Certification gate for entities. Fails open when nothing is configured.
    pub fn is_entity_allowed(&self, profile: &str, entity_name: &str) -> bool {
        self.certified_list(profile)
            .map_or(true, |list| list.allows_entity(entity_name))
    }

    /// Certification gate for property sets. Fails open when nothing is configured.
    pub fn is_pset_allowed(&self, profile: &str, pset_name: &str) -> bool {
        self.certified_list(profile)
            .map_or(true, |list| list.allows_pset(pset_name))
    }

    /// Runs both gates against the active profile.
    pub fn check(&self, export_type: &ExportType) -> std::result::Result<(), Rejection> {
        if self.exclude.is_excluded(export_type) {
            return Err(Rejection::Excluded);
        }
        if let Some(profile) = self.profile.as_deref() {
            if !self.is_entity_allowed(profile, export_type.entity.as_str()) {
                return Err(Rejection::NotCertified {
                    profile: profile.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn admits(&self, export_type: &ExportType) -> bool {
        self.check(export_type).is_ok()
    }

    /// Certification gate for a property set under the active profile.
    pub fn admits_pset(&self, pset_name: &str) -> bool {
        match self.profile.as_deref() {
            Some(profile) => self.is_pset_allowed(profile, pset_name),
            None => true,
        }
    }
}
