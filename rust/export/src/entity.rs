// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC entity kinds written by the export core.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

macro_rules! entity_kinds {
    ($($variant:ident => $step:literal),* $(,)?) => {
        /// IFC entity kinds known to the export core.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EntityKind {
            $($variant,)*
        }

        impl EntityKind {
            /// Every known entity kind.
            pub const ALL: &'static [EntityKind] = &[$(EntityKind::$variant,)*];

            /// Schema name, e.g. `IfcWall`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EntityKind::$variant => stringify!($variant),)*
                }
            }

            /// Upper-case STEP name, e.g. `IFCWALL`.
            pub fn step_name(&self) -> &'static str {
                match self {
                    $(EntityKind::$variant => $step,)*
                }
            }

            /// Parses an upper-case STEP name.
            pub fn from_step_name(s: &str) -> Option<Self> {
                match s {
                    $($step => Some(EntityKind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

entity_kinds! {
    // Building elements
    IfcWall => "IFCWALL",
    IfcSlab => "IFCSLAB",
    IfcBeam => "IFCBEAM",
    IfcColumn => "IFCCOLUMN",
    IfcRoof => "IFCROOF",
    IfcStair => "IFCSTAIR",
    IfcRailing => "IFCRAILING",
    IfcCovering => "IFCCOVERING",
    IfcCurtainWall => "IFCCURTAINWALL",
    IfcPlate => "IFCPLATE",
    IfcMember => "IFCMEMBER",
    IfcPile => "IFCPILE",
    IfcFooting => "IFCFOOTING",
    IfcDoor => "IFCDOOR",
    IfcWindow => "IFCWINDOW",
    IfcBuildingElementProxy => "IFCBUILDINGELEMENTPROXY",
    IfcFurnishingElement => "IFCFURNISHINGELEMENT",
    IfcDuctSegment => "IFCDUCTSEGMENT",
    IfcPipeSegment => "IFCPIPESEGMENT",
    IfcFlowTerminal => "IFCFLOWTERMINAL",
    IfcOpeningElement => "IFCOPENINGELEMENT",
    IfcElementAssembly => "IFCELEMENTASSEMBLY",

    // Spatial structure
    IfcSpace => "IFCSPACE",
    IfcBuildingStorey => "IFCBUILDINGSTOREY",

    // Groups
    IfcGroup => "IFCGROUP",
    IfcZone => "IFCZONE",
    IfcSystem => "IFCSYSTEM",
    IfcDistributionSystem => "IFCDISTRIBUTIONSYSTEM",

    // Type objects
    IfcWallType => "IFCWALLTYPE",
    IfcSlabType => "IFCSLABTYPE",
    IfcBeamType => "IFCBEAMTYPE",
    IfcColumnType => "IFCCOLUMNTYPE",
    IfcDoorType => "IFCDOORTYPE",
    IfcWindowType => "IFCWINDOWTYPE",
    IfcBuildingElementProxyType => "IFCBUILDINGELEMENTPROXYTYPE",
    IfcFurnitureType => "IFCFURNITURETYPE",

    // Placement and representation resources
    IfcLocalPlacement => "IFCLOCALPLACEMENT",
    IfcAxis2Placement3D => "IFCAXIS2PLACEMENT3D",
    IfcProductDefinitionShape => "IFCPRODUCTDEFINITIONSHAPE",
    IfcShapeRepresentation => "IFCSHAPEREPRESENTATION",
    IfcCartesianPointList2D => "IFCCARTESIANPOINTLIST2D",
    IfcIndexedPolyCurve => "IFCINDEXEDPOLYCURVE",
    IfcArbitraryClosedProfileDef => "IFCARBITRARYCLOSEDPROFILEDEF",
    IfcExtrudedAreaSolid => "IFCEXTRUDEDAREASOLID",
    IfcCartesianPointList3D => "IFCCARTESIANPOINTLIST3D",
    IfcTriangulatedFaceSet => "IFCTRIANGULATEDFACESET",
    IfcFacetedBrep => "IFCFACETEDBREP",
    IfcClosedShell => "IFCCLOSEDSHELL",
    IfcPolyLoop => "IFCPOLYLOOP",
    IfcFaceOuterBound => "IFCFACEOUTERBOUND",
    IfcFace => "IFCFACE",

    // Properties
    IfcPropertySet => "IFCPROPERTYSET",
    IfcPropertySingleValue => "IFCPROPERTYSINGLEVALUE",

    // Relationships
    IfcRelAssignsToGroup => "IFCRELASSIGNSTOGROUP",
    IfcRelAggregates => "IFCRELAGGREGATES",
    IfcRelDefinesByProperties => "IFCRELDEFINESBYPROPERTIES",
    IfcRelContainedInSpatialStructure => "IFCRELCONTAINEDINSPATIALSTRUCTURE",
    IfcRelVoidsElement => "IFCRELVOIDSELEMENT",
}

impl EntityKind {
    /// Returns `true` for `IfcRel*` entities.
    pub fn is_relationship(&self) -> bool {
        self.as_str().starts_with("IfcRel")
    }

    /// Returns `true` for type objects (`IfcWallType`, ...).
    pub fn is_type_object(&self) -> bool {
        self.as_str().ends_with("Type")
    }

    /// Returns `true` for group-like entities that collect members through
    /// `IfcRelAssignsToGroup`.
    pub fn is_group(&self) -> bool {
        matches!(
            self,
            EntityKind::IfcGroup
                | EntityKind::IfcZone
                | EntityKind::IfcSystem
                | EntityKind::IfcDistributionSystem
        )
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    /// Accepts `IfcWall`, `IFCWALL` or any other casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::from_step_name(&upper).ok_or_else(|| Error::UnknownEntity(s.to_string()))
    }
}

/// The entity kind an element is exported as, optionally narrowed by a
/// predefined type (`IfcWall.SHEAR`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExportType {
    pub entity: EntityKind,
    pub predefined_type: Option<String>,
}

impl ExportType {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            predefined_type: None,
        }
    }

    /// Narrows the export type to a predefined type. Stored upper-case.
    pub fn with_predefined(mut self, predefined: &str) -> Self {
        let predefined = predefined.trim();
        self.predefined_type = if predefined.is_empty() {
            None
        } else {
            Some(predefined.to_ascii_uppercase())
        };
        self
    }
}

impl From<EntityKind> for ExportType {
    fn from(entity: EntityKind) -> Self {
        Self::new(entity)
    }
}

impl std::fmt::Display for ExportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.predefined_type {
            Some(p) => write!(f, "{}.{}", self.entity, p),
            None => write!(f, "{}", self.entity),
        }
    }
}

impl FromStr for ExportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((entity, predefined)) => {
                Ok(ExportType::new(entity.parse()?).with_predefined(predefined))
            }
            None => Ok(ExportType::new(s.parse()?)),
        }
    }
}
