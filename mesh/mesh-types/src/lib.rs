//! Core mesh types shared by the registration crates.
//!
//! - [`Vertex`] - A point in 3D space with an optional unit normal
//! - [`IndexedMesh`] - A triangle mesh with indexed vertices
//! - [`Aabb`] - Axis-aligned bounding box
//!
//! Meshes are plain values owned by the caller. Registration reads them,
//! never keeps references to them, and returns transformed copies.
//!
//! # Units
//!
//! This library is **unit-agnostic**. All coordinates are `f64`.
//! Anatomical models are usually expressed in millimeters.
//!
//! # Example
//!
//! ```
//! use mesh_types::{IndexedMesh, Point3, Vertex};
//!
//! let mut mesh = IndexedMesh::new();
//! mesh.vertices.push(Vertex::new(Point3::new(0.0, 0.0, 0.0)));
//! mesh.vertices.push(Vertex::new(Point3::new(3.0, 0.0, 0.0)));
//! mesh.vertices.push(Vertex::new(Point3::new(0.0, 4.0, 0.0)));
//! mesh.faces.push([0, 1, 2]);
//!
//! assert_eq!(mesh.faces.len(), 1);
//! assert!((mesh.bounds().diagonal() - 5.0).abs() < 1e-12);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod bounds;
mod mesh;
mod vertex;

pub use bounds::Aabb;
pub use mesh::IndexedMesh;
pub use vertex::Vertex;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point3, Vector3};
