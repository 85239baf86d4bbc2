//! Edge and vertex adjacency derived from a face list.

use std::collections::HashMap;

/// An undirected edge and the faces that share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Endpoints, smaller index first.
    pub vertices: [usize; 2],
    /// Incident faces in face-list order. One face means a boundary edge.
    pub faces: Vec<usize>,
}

impl Edge {
    /// Whether the edge has exactly one incident face.
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.faces.len() == 1
    }
}

/// Adjacency tables of a triangle mesh.
///
/// Built once per mesh: the fitters never change topology, so the Laplacian
/// and the silhouette search can reuse these tables every iteration.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    edges: Vec<Edge>,
    neighbors: Vec<Vec<usize>>,
}

impl Topology {
    /// Build edge and neighbor tables for `nb_vertices` vertices.
    pub fn build(faces: &[[usize; 3]], nb_vertices: usize) -> Self {
        let mut edge_map: HashMap<(usize, usize), usize> = HashMap::new();
        let mut edges: Vec<Edge> = Vec::with_capacity(faces.len() * 3 / 2 + 1);

        for (fi, face) in faces.iter().enumerate() {
            for k in 0..3 {
                let a = face[k];
                let b = face[(k + 1) % 3];
                let key = (a.min(b), a.max(b));
                match edge_map.get(&key) {
                    Some(&ei) => edges[ei].faces.push(fi),
                    None => {
                        edge_map.insert(key, edges.len());
                        edges.push(Edge {
                            vertices: [key.0, key.1],
                            faces: vec![fi],
                        });
                    }
                }
            }
        }

        let mut neighbors = vec![Vec::new(); nb_vertices];
        for edge in &edges {
            let [a, b] = edge.vertices;
            neighbors[a].push(b);
            neighbors[b].push(a);
        }
        for list in &mut neighbors {
            list.sort_unstable();
        }

        Self { edges, neighbors }
    }

    /// All undirected edges.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Sorted neighbor indices of vertex `v`.
    #[inline]
    pub fn neighbors(&self, v: usize) -> &[usize] {
        &self.neighbors[v]
    }

    /// Number of neighbors of vertex `v`.
    #[inline]
    pub fn degree(&self, v: usize) -> usize {
        self.neighbors[v].len()
    }

    /// Number of vertices the tables were built for.
    #[inline]
    pub fn nb_vertices(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether every edge has exactly two incident faces.
    pub fn is_closed(&self) -> bool {
        self.edges.iter().all(|e| e.faces.len() == 2)
    }
}

/// Index of the vertex of `face` that is not on the edge `(a, b)`.
#[inline]
pub fn opposite_vertex(face: &[usize; 3], a: usize, b: usize) -> usize {
    face.iter()
        .copied()
        .find(|&v| v != a && v != b)
        .unwrap_or(face[0])
}
