// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Export configuration loaded from environment variables or JSON.

use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionFilter, ExcludeList};
use crate::error::Result;
use crate::geometry::Tessellation;

/// Export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportConfig {
    /// Entities to leave out, e.g. `IfcSpace` or `IfcWall.SHEAR`.
    pub exclude: Vec<String>,
    /// Share body geometry between unmodified group and assembly members.
    pub reuse_group_geometry: bool,
    pub tessellation: Tessellation,
    /// Active exchange profile (MVD) for certification checks.
    pub exchange_profile: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            reuse_group_geometry: true,
            tessellation: Tessellation::default(),
            exchange_profile: None,
        }
    }
}

impl ExportConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            exclude: std::env::var("IFC_EXPORT_EXCLUDE")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            reuse_group_geometry: std::env::var("IFC_EXPORT_REUSE_GROUP_GEOMETRY")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.reuse_group_geometry),
            tessellation: std::env::var("IFC_EXPORT_TESSELLATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.tessellation),
            exchange_profile: std::env::var("IFC_EXPORT_PROFILE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    /// Parses configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn exclude_list(&self) -> ExcludeList {
        ExcludeList::from_names(&self.exclude)
    }

    /// Admission filter for this configuration, without a certification table.
    pub fn admission_filter(&self) -> AdmissionFilter {
        AdmissionFilter::new(self.exclude_list(), self.exchange_profile.clone())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, ExportType};

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = ExportConfig::from_json_str(
            r#"{ "exclude": ["IfcSpace"], "tessellation": "low" }"#,
        )
        .unwrap();
        assert_eq!(config.tessellation, Tessellation::Low);
        assert!(config.reuse_group_geometry);
        assert!(config.exchange_profile.is_none());
        assert!(config
            .admission_filter()
            .exclude_list()
            .is_excluded(&ExportType::new(EntityKind::IfcSpace)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ExportConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
