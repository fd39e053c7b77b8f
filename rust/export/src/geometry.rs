// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Body representations built from host geometry primitives.
//!
//! The host's geometry kernel hands over already evaluated primitives.
//! [`RepresentationBuilder`] writes them as representation items and one
//! `Body` shape representation inside the caller's build scope.

use std::str::FromStr;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::document::{AttributeValue, Handle, Instance, OutputDocument};
use crate::entity::EntityKind;
use crate::error::Error;
use crate::transaction::BuildTransaction;

/// Geometry primitive produced by the host's geometry kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryPrimitive {
    /// Closed 2D profile swept along the extrusion axis.
    Extrusion { profile: Vec<[f64; 2]>, depth: f64 },
    /// Indexed triangle mesh.
    Mesh {
        positions: Vec<[f64; 3]>,
        triangles: Vec<[u32; 3]>,
    },
    /// Planar polygonal faces of a closed solid.
    Brep { faces: Vec<Vec<[f64; 3]>> },
}

impl GeometryPrimitive {
    /// Returns `true` when the primitive cannot produce a valid item.
    pub fn is_degenerate(&self) -> bool {
        match self {
            GeometryPrimitive::Extrusion { profile, depth } => {
                profile.len() < 3
                    || !depth.is_finite()
                    || *depth <= 0.0
                    || profile.iter().flatten().any(|c| !c.is_finite())
            }
            GeometryPrimitive::Mesh {
                positions,
                triangles,
            } => {
                let count = positions.len();
                triangles.is_empty()
                    || triangles
                        .iter()
                        .flatten()
                        .any(|&i| i as usize >= count)
            }
            GeometryPrimitive::Brep { faces } => !faces.iter().any(|f| f.len() >= 3),
        }
    }
}

/// Tessellation level for boundary-represented geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tessellation {
    ExtraLow,
    Low,
    #[default]
    Medium,
    High,
}

impl Tessellation {
    /// Whether faces are triangulated instead of kept as polygons.
    pub fn triangulates_faces(self) -> bool {
        self <= Tessellation::Low
    }
}

impl FromStr for Tessellation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "extralow" => Ok(Tessellation::ExtraLow),
            "low" => Ok(Tessellation::Low),
            "medium" => Ok(Tessellation::Medium),
            "high" => Ok(Tessellation::High),
            _ => Err(Error::Config(format!("unknown tessellation level '{s}'"))),
        }
    }
}

/// Writes geometry primitives as IFC representation items.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepresentationBuilder {
    tessellation: Tessellation,
}

impl RepresentationBuilder {
    pub fn new(tessellation: Tessellation) -> Self {
        Self { tessellation }
    }

    pub fn tessellation(&self) -> Tessellation {
        self.tessellation
    }

    /// Builds the body representation of one element.
    ///
    /// Returns the shape representation handles, or an empty list when no
    /// primitive produced a usable item. In that case nothing was created.
    pub fn build<D, I>(
        &self,
        tx: &mut BuildTransaction<'_, D>,
        primitives: I,
        extrusion_axis: &Vector3<f64>,
    ) -> SmallVec<[Handle; 2]>
    where
        D: OutputDocument,
        I: IntoIterator<Item = GeometryPrimitive>,
    {
        let mut items = Vec::new();
        let mut kinds: SmallVec<[&'static str; 2]> = SmallVec::new();

        for primitive in primitives {
            if primitive.is_degenerate() {
                tracing::debug!(?primitive, "skipping degenerate geometry primitive");
                continue;
            }
            let (item, representation_type) = self.build_item(tx, primitive, extrusion_axis);
            items.push(item);
            if !kinds.contains(&representation_type) {
                kinds.push(representation_type);
            }
        }

        if items.is_empty() {
            return SmallVec::new();
        }

        let representation_type = match kinds.as_slice() {
            [single] => *single,
            _ => "SolidModel",
        };
        let representation = tx.create(
            Instance::new(EntityKind::IfcShapeRepresentation)
                .with("ContextOfItems", AttributeValue::Null)
                .with("RepresentationIdentifier", AttributeValue::String("Body".into()))
                .with(
                    "RepresentationType",
                    AttributeValue::String(representation_type.into()),
                )
                .with("Items", AttributeValue::refs(items)),
        );

        let mut handles = SmallVec::new();
        handles.push(representation);
        handles
    }

    fn build_item<D: OutputDocument>(
        &self,
        tx: &mut BuildTransaction<'_, D>,
        primitive: GeometryPrimitive,
        extrusion_axis: &Vector3<f64>,
    ) -> (Handle, &'static str) {
        match primitive {
            GeometryPrimitive::Extrusion { profile, depth } => {
                (extruded_area_solid(tx, &profile, depth, extrusion_axis), "SweptSolid")
            }
            GeometryPrimitive::Mesh {
                positions,
                triangles,
            } => (triangulated_face_set(tx, &positions, &triangles), "Tessellation"),
            GeometryPrimitive::Brep { faces } => {
                if self.tessellation.triangulates_faces() {
                    let (positions, triangles) = triangulate_faces(&faces);
                    (triangulated_face_set(tx, &positions, &triangles), "Tessellation")
                } else {
                    (faceted_brep(tx, &faces), "Brep")
                }
            }
        }
    }
}

fn extruded_area_solid<D: OutputDocument>(
    tx: &mut BuildTransaction<'_, D>,
    profile: &[[f64; 2]],
    depth: f64,
    axis: &Vector3<f64>,
) -> Handle {
    let points = tx.create(Instance::new(EntityKind::IfcCartesianPointList2D).with(
        "CoordList",
        AttributeValue::List(profile.iter().map(|p| AttributeValue::reals(*p)).collect()),
    ));
    // Closed curve: repeat the first index at the end.
    let indices = (1..=profile.len() as i64).chain(std::iter::once(1));
    let curve = tx.create(
        Instance::new(EntityKind::IfcIndexedPolyCurve)
            .with("Points", AttributeValue::Ref(points))
            .with(
                "Segments",
                AttributeValue::List(vec![AttributeValue::List(
                    indices.map(AttributeValue::Int).collect(),
                )]),
            )
            .with("SelfIntersect", AttributeValue::Bool(false)),
    );
    let area = tx.create(
        Instance::new(EntityKind::IfcArbitraryClosedProfileDef)
            .with("ProfileType", AttributeValue::Enum("AREA".into()))
            .with("ProfileName", AttributeValue::Null)
            .with("OuterCurve", AttributeValue::Ref(curve)),
    );

    let direction = axis.try_normalize(1e-12).unwrap_or_else(Vector3::z);
    tx.create(
        Instance::new(EntityKind::IfcExtrudedAreaSolid)
            .with("SweptArea", AttributeValue::Ref(area))
            .with("Position", AttributeValue::Null)
            .with(
                "ExtrudedDirection",
                AttributeValue::reals([direction.x, direction.y, direction.z]),
            )
            .with("Depth", AttributeValue::Real(depth)),
    )
}

fn triangulated_face_set<D: OutputDocument>(
    tx: &mut BuildTransaction<'_, D>,
    positions: &[[f64; 3]],
    triangles: &[[u32; 3]],
) -> Handle {
    let points = tx.create(Instance::new(EntityKind::IfcCartesianPointList3D).with(
        "CoordList",
        AttributeValue::List(positions.iter().map(|p| AttributeValue::reals(*p)).collect()),
    ));
    // IFC indices are 1-based.
    let coord_index = triangles
        .iter()
        .map(|t| AttributeValue::List(t.iter().map(|&i| AttributeValue::Int(i as i64 + 1)).collect()))
        .collect();
    tx.create(
        Instance::new(EntityKind::IfcTriangulatedFaceSet)
            .with("Coordinates", AttributeValue::Ref(points))
            .with("Normals", AttributeValue::Null)
            .with("Closed", AttributeValue::Null)
            .with("CoordIndex", AttributeValue::List(coord_index)),
    )
}

fn faceted_brep<D: OutputDocument>(
    tx: &mut BuildTransaction<'_, D>,
    faces: &[Vec<[f64; 3]>],
) -> Handle {
    let mut face_handles = Vec::with_capacity(faces.len());
    for face in faces.iter().filter(|f| f.len() >= 3) {
        let polygon = AttributeValue::List(face.iter().map(|p| AttributeValue::reals(*p)).collect());
        let face_loop = tx.create(Instance::new(EntityKind::IfcPolyLoop).with("Polygon", polygon));
        let bound = tx.create(
            Instance::new(EntityKind::IfcFaceOuterBound)
                .with("Bound", AttributeValue::Ref(face_loop))
                .with("Orientation", AttributeValue::Bool(true)),
        );
        face_handles.push(tx.create(
            Instance::new(EntityKind::IfcFace).with("Bounds", AttributeValue::refs([bound])),
        ));
    }
    let shell = tx.create(
        Instance::new(EntityKind::IfcClosedShell).with("CfsFaces", AttributeValue::refs(face_handles)),
    );
    tx.create(Instance::new(EntityKind::IfcFacetedBrep).with("Outer", AttributeValue::Ref(shell)))
}

/// Fan-triangulates planar polygon faces into one shared vertex list.
fn triangulate_faces(faces: &[Vec<[f64; 3]>]) -> (Vec<[f64; 3]>, Vec<[u32; 3]>) {
    let mut positions = Vec::new();
    let mut triangles = Vec::new();
    for face in faces.iter().filter(|f| f.len() >= 3) {
        let base = positions.len() as u32;
        positions.extend_from_slice(face);
        for i in 1..face.len() as u32 - 1 {
            triangles.push([base, base + i, base + i + 1]);
        }
    }
    (positions, triangles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InstanceArena;

    fn square_extrusion() -> GeometryPrimitive {
        GeometryPrimitive::Extrusion {
            profile: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            depth: 2.5,
        }
    }

    fn cube_faces() -> Vec<Vec<[f64; 3]>> {
        let p = |x, y, z| [x, y, z];
        vec![
            vec![p(0., 0., 0.), p(1., 0., 0.), p(1., 1., 0.), p(0., 1., 0.)],
            vec![p(0., 0., 1.), p(1., 0., 1.), p(1., 1., 1.), p(0., 1., 1.)],
            vec![p(0., 0., 0.), p(1., 0., 0.), p(1., 0., 1.), p(0., 0., 1.)],
            vec![p(1., 0., 0.), p(1., 1., 0.), p(1., 1., 1.), p(1., 0., 1.)],
            vec![p(1., 1., 0.), p(0., 1., 0.), p(0., 1., 1.), p(1., 1., 1.)],
            vec![p(0., 1., 0.), p(0., 0., 0.), p(0., 0., 1.), p(0., 1., 1.)],
        ]
    }

    #[test]
    fn degenerate_primitives() {
        assert!(!square_extrusion().is_degenerate());
        assert!(GeometryPrimitive::Extrusion {
            profile: vec![[0.0, 0.0], [1.0, 0.0]],
            depth: 1.0
        }
        .is_degenerate());
        assert!(GeometryPrimitive::Mesh {
            positions: vec![[0.0; 3]; 3],
            triangles: vec![[0, 1, 3]],
        }
        .is_degenerate());
        assert!(GeometryPrimitive::Brep { faces: vec![] }.is_degenerate());
    }

    #[test]
    fn extrusion_builds_single_body_representation() {
        let mut doc = InstanceArena::new();
        let mut tx = BuildTransaction::begin(&mut doc);
        let reps = RepresentationBuilder::default().build(&mut tx, [square_extrusion()], &Vector3::z());
        tx.commit();

        assert_eq!(reps.len(), 1);
        assert_eq!(doc.count_of(EntityKind::IfcExtrudedAreaSolid), 1);
        let rep = doc.get(reps[0]).unwrap();
        assert_eq!(
            rep.attribute("RepresentationType"),
            Some(&AttributeValue::String("SweptSolid".into()))
        );
    }

    #[test]
    fn only_degenerate_input_creates_nothing() {
        let mut doc = InstanceArena::new();
        let mut tx = BuildTransaction::begin(&mut doc);
        let reps = RepresentationBuilder::default().build(
            &mut tx,
            [GeometryPrimitive::Brep { faces: vec![] }],
            &Vector3::z(),
        );
        assert!(reps.is_empty());
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn tessellation_level_selects_brep_encoding() {
        let brep = GeometryPrimitive::Brep { faces: cube_faces() };

        let mut coarse = InstanceArena::new();
        let mut tx = BuildTransaction::begin(&mut coarse);
        RepresentationBuilder::new(Tessellation::Low).build(&mut tx, [brep.clone()], &Vector3::z());
        tx.commit();
        assert_eq!(coarse.count_of(EntityKind::IfcTriangulatedFaceSet), 1);
        assert_eq!(coarse.count_of(EntityKind::IfcFacetedBrep), 0);

        let mut fine = InstanceArena::new();
        let mut tx = BuildTransaction::begin(&mut fine);
        RepresentationBuilder::new(Tessellation::High).build(&mut tx, [brep], &Vector3::z());
        tx.commit();
        assert_eq!(fine.count_of(EntityKind::IfcFacetedBrep), 1);
        assert_eq!(fine.count_of(EntityKind::IfcFace), 6);
    }

    #[test]
    fn fan_triangulation_counts() {
        let (positions, triangles) = triangulate_faces(&cube_faces());
        assert_eq!(positions.len(), 24);
        assert_eq!(triangles.len(), 12);
    }

    #[test]
    fn tessellation_parses_loosely() {
        assert_eq!("extra_low".parse::<Tessellation>().unwrap(), Tessellation::ExtraLow);
        assert_eq!("High".parse::<Tessellation>().unwrap(), Tessellation::High);
        assert!("ultra".parse::<Tessellation>().is_err());
        assert_eq!(Tessellation::default(), Tessellation::Medium);
    }
}
