//! Core mesh data structures.
//!
//! This module provides the indexed triangle mesh used throughout the fitting
//! pipeline, along with the adjacency tables and vertex normals the renderer
//! and the rigidity regularizer need.
//!
//! # Overview
//!
//! The primary type is [`TriMesh`]: a face list that is fixed for the lifetime
//! of the mesh, plus vertex positions and optional per-vertex colors that are
//! replaced every fitting iteration. Its [`Topology`] (edges with their
//! incident faces, per-vertex neighbors) is computed once at construction.
//!
//! # Construction
//!
//! ```
//! use meshfit::mesh::TriMesh;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//!     Point3::new(0.5, 0.5, 1.0),
//! ];
//! let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
//!
//! let mesh = TriMesh::new(faces, vertices).unwrap();
//! assert!(mesh.topology().is_closed());
//! ```

mod normals;
mod primitives;
mod topology;
mod trimesh;

pub use normals::{vertex_normals, vertex_normals_backward, VertexNormals};
pub use primitives::icosphere;
pub use topology::{opposite_vertex, Edge, Topology};
pub use trimesh::{centroid, object_radius, TriMesh};
