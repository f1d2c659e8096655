//! Indexed triangle mesh.

use crate::{Aabb, Vertex};
use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An indexed triangle mesh.
///
/// Stores vertices and faces separately, with faces referencing vertices
/// by index. Registration only reads vertex positions; faces are carried
/// along so aligned copies keep their connectivity.
///
/// # Example
///
/// ```
/// use mesh_types::{IndexedMesh, Vertex};
///
/// let mut mesh = IndexedMesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// assert_eq!(mesh.vertex_count(), 3);
/// assert_eq!(mesh.faces.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexedMesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,
}

impl IndexedMesh {
    /// Create a new empty mesh.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh from vertices and faces.
    #[inline]
    #[must_use]
    pub const fn from_parts(vertices: Vec<Vertex>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Create a point-only mesh (no faces) from positions.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::{IndexedMesh, Point3};
    ///
    /// let cloud = IndexedMesh::from_points([Point3::origin(), Point3::new(1.0, 1.0, 1.0)]);
    /// assert_eq!(cloud.vertex_count(), 2);
    /// assert!(cloud.faces.is_empty());
    /// ```
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = Point3<f64>>) -> Self {
        Self {
            vertices: points.into_iter().map(Vertex::new).collect(),
            faces: Vec::new(),
        }
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true when the mesh has no vertices.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Returns true when every vertex coordinate is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.vertices.iter().all(Vertex::is_finite)
    }

    /// Vertex positions in order.
    pub fn positions(&self) -> impl ExactSizeIterator<Item = Point3<f64>> + '_ {
        self.vertices.iter().map(|v| v.position)
    }

    /// Axis-aligned bounds of all vertices. Empty when the mesh is empty.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }

    /// Translate mesh by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }

    /// Scale mesh uniformly around the origin.
    ///
    /// Normals keep their direction for positive factors and flip for
    /// negative ones.
    pub fn scale(&mut self, factor: f64) {
        for vertex in &mut self.vertices {
            vertex.position.coords *= factor;
            if factor < 0.0 {
                if let Some(normal) = vertex.normal.as_mut() {
                    *normal = -*normal;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> IndexedMesh {
        IndexedMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(2.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 2.0, 1.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_bounds_and_diagonal() {
        let mesh = triangle();
        let bounds = mesh.bounds();
        assert_relative_eq!(bounds.diagonal(), 3.0, epsilon = 1e-12);
        assert_eq!(bounds.min, Point3::origin());
    }

    #[test]
    fn test_empty_mesh_bounds() {
        assert!(IndexedMesh::new().bounds().is_empty());
    }

    #[test]
    fn test_scale_about_origin() {
        let mut mesh = triangle();
        mesh.scale(0.5);
        assert_relative_eq!(mesh.vertices[1].position.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(mesh.vertices[2].position.z, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_negative_flips_normals() {
        let mut mesh = IndexedMesh::from_parts(
            vec![Vertex::with_normal(Point3::new(1.0, 0.0, 0.0), Vector3::x())],
            Vec::new(),
        );
        mesh.scale(-1.0);
        assert_eq!(mesh.vertices[0].normal, Some(-Vector3::x()));
    }

    #[test]
    fn test_translate() {
        let mut mesh = triangle();
        mesh.translate(Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(mesh.vertices[0].position, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_positions_and_finiteness() {
        let mut mesh = triangle();
        assert_eq!(mesh.positions().len(), 3);
        assert!(mesh.is_finite());
        mesh.vertices.push(Vertex::from_coords(f64::NAN, 0.0, 0.0));
        assert!(!mesh.is_finite());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip() {
        let mesh = triangle();
        let json = serde_json::to_string(&mesh).unwrap();
        let back: IndexedMesh = serde_json::from_str(&json).unwrap();
        assert_eq!(mesh, back);
    }
}
