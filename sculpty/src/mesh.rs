//! Unstructured meshes of a single element kind.
//!
//! Positions are stored flat: coordinate `d` of vertex `i` lives at
//! `vertices[i * dim + d]`, which is also the layout of every DOF vector in
//! this crate.

use ahash::{AHashMap, AHashSet};

use crate::basis::{det, element_geometry, mat3_zero, ElementKind, ElementValues};
use crate::Error;

#[derive(Clone, Debug)]
pub struct Mesh {
    pub dim: usize,
    pub kind: ElementKind,
    pub vertices: Vec<f64>,
    /// Flat connectivity with `kind.num_nodes()` entries per cell.
    pub cells: Vec<usize>,
    /// Body (volume selection) id of each cell.
    pub body_ids: Vec<usize>,
    /// Boundary tags keyed by the sorted node list of a facet.
    pub facet_tags: AHashMap<Vec<usize>, i32>,
}

fn sorted(nodes: &[usize]) -> Vec<usize> {
    let mut key = nodes.to_vec();
    key.sort_unstable();
    key
}

impl Mesh {
    pub fn new(kind: ElementKind, vertices: Vec<f64>, cells: Vec<usize>) -> Result<Mesh, Error> {
        let dim = kind.dim();
        if vertices.len() % dim != 0 || cells.len() % kind.num_nodes() != 0 {
            return Err(Error::SizeMismatch);
        }
        let num_verts = vertices.len() / dim;
        if cells.iter().any(|&v| v >= num_verts) {
            return Err(Error::InvalidParameter {
                name: "cells".to_string(),
            });
        }
        let num_cells = cells.len() / kind.num_nodes();
        Ok(Mesh {
            dim,
            kind,
            vertices,
            cells,
            body_ids: vec![0; num_cells],
            facet_tags: AHashMap::default(),
        })
    }

    pub fn with_body_ids(mut self, body_ids: Vec<usize>) -> Result<Mesh, Error> {
        if body_ids.len() != self.num_cells() {
            return Err(Error::SizeMismatch);
        }
        self.body_ids = body_ids;
        Ok(self)
    }

    pub fn tag_facet(&mut self, nodes: &[usize], tag: i32) {
        self.facet_tags.insert(sorted(nodes), tag);
    }

    pub fn facet_tag(&self, nodes: &[usize]) -> Option<i32> {
        self.facet_tags.get(&sorted(nodes)).copied()
    }

    /// Tags every boundary facet whose nodes all satisfy `pred`.
    pub fn tag_boundary_where(&mut self, tag: i32, pred: impl Fn(&[f64]) -> bool) {
        for facet in self.boundary_facets() {
            if facet.iter().all(|&v| pred(self.vertex(v))) {
                self.tag_facet(&facet, tag);
            }
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / self.dim
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len() / self.kind.num_nodes()
    }

    pub fn num_dofs(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertex(&self, i: usize) -> &[f64] {
        &self.vertices[i * self.dim..(i + 1) * self.dim]
    }

    pub fn cell(&self, i: usize) -> &[usize] {
        let n = self.kind.num_nodes();
        &self.cells[i * n..(i + 1) * n]
    }

    pub fn cell_iter(&self) -> impl Iterator<Item = &[usize]> {
        self.cells.chunks_exact(self.kind.num_nodes())
    }

    /// Global DOF indices of a cell, node major.
    pub fn cell_dofs(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        let dim = self.dim;
        self.cell(i)
            .iter()
            .flat_map(move |&v| (0..dim).map(move |d| v * dim + d))
    }

    /// Gathers the node positions of cell `i` from `vertices`.
    pub fn cell_nodes(&self, i: usize, vertices: &[f64]) -> Vec<f64> {
        self.cell_dofs(i).map(|dof| vertices[dof]).collect()
    }

    /// Sorted list of distinct body ids.
    pub fn body_id_set(&self) -> Vec<usize> {
        let mut ids = self.body_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Facets referenced by exactly one cell, in the orientation of that cell.
    pub fn boundary_facets(&self) -> Vec<Vec<usize>> {
        let mut count: AHashMap<Vec<usize>, (usize, Vec<usize>)> = AHashMap::default();
        let mut order = Vec::new();
        for cell in self.cell_iter() {
            for local in self.kind.facets() {
                let facet: Vec<usize> = local.iter().map(|&l| cell[l]).collect();
                let key = sorted(&facet);
                let entry = count.entry(key.clone()).or_insert_with(|| {
                    order.push(key);
                    (0, facet)
                });
                entry.0 += 1;
            }
        }
        order
            .into_iter()
            .filter_map(|key| match count.remove(&key) {
                Some((1, facet)) => Some(facet),
                _ => None,
            })
            .collect()
    }

    /// Sorted indices of vertices lying on the boundary.
    pub fn boundary_vertices(&self) -> Vec<usize> {
        let mut verts: Vec<usize> = self.boundary_facets().into_iter().flatten().collect();
        verts.sort_unstable();
        verts.dedup();
        verts
    }

    /// Unique undirected edges of the mesh.
    pub fn edges(&self) -> Vec<[usize; 2]> {
        let mut seen = AHashSet::default();
        let mut edges = Vec::new();
        for cell in self.cell_iter() {
            for &[a, b] in self.kind.edges() {
                let e = [cell[a].min(cell[b]), cell[a].max(cell[b])];
                if seen.insert(e) {
                    edges.push(e);
                }
            }
        }
        edges
    }

    /// Vertex to vertex adjacency through mesh edges.
    pub fn vertex_adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.num_vertices()];
        for [a, b] in self.edges() {
            adj[a].push(b);
            adj[b].push(a);
        }
        adj
    }

    /// Precomputes element values at the default quadrature of every cell.
    pub fn element_values(&self) -> Result<Vec<ElementValues>, Error> {
        let quadrature = self.kind.quadrature();
        let mut degens = Vec::new();
        let mut values = Vec::with_capacity(self.num_cells());
        for e in 0..self.num_cells() {
            match ElementValues::compute(self.kind, &self.cell_nodes(e, &self.vertices), &quadrature) {
                Ok(v) => values.push(v),
                Err(Error::DegenerateReferenceElement { .. }) => degens.push(e),
                Err(err) => return Err(err),
            }
        }
        if !degens.is_empty() {
            return Err(Error::DegenerateReferenceElement { degens });
        }
        Ok(values)
    }

    /// Signed corner Jacobians of cell `e` at the given positions.
    fn corner_jacobians(&self, e: usize, vertices: &[f64]) -> Vec<f64> {
        let nodes = self.cell_nodes(e, vertices);
        let dim = self.dim;
        if self.kind.is_simplex() {
            let geo = element_geometry::<f64>(self.kind, &nodes, &[0.25, 0.25, 0.25]);
            return vec![geo.jac_det];
        }
        (0..self.kind.num_nodes())
            .map(|c| {
                let mut m = mat3_zero::<f64>();
                for (col, &nb) in self.kind.corner_neighbours(c).iter().enumerate() {
                    for i in 0..dim {
                        m[i][col] = nodes[nb * dim + i] - nodes[c * dim + i];
                    }
                }
                det(&m, dim)
            })
            .collect()
    }

    /// Indices of cells with a non-positive Jacobian somewhere.
    pub fn inverted_cells(&self, vertices: &[f64]) -> Vec<usize> {
        (0..self.num_cells())
            .filter(|&e| {
                self.corner_jacobians(e, vertices)
                    .iter()
                    .any(|&j| !(j > 0.0))
            })
            .collect()
    }

    /// Whether any cell is inverted or degenerate at the given positions.
    pub fn is_flipped(&self, vertices: &[f64]) -> bool {
        (0..self.num_cells()).any(|e| {
            self.corner_jacobians(e, vertices)
                .iter()
                .any(|&j| !(j > 0.0))
        })
    }

    /// Scaled Jacobian quality of every cell. Equals one for regular simplices
    /// and squares/cubes and is non-positive for inverted cells.
    pub fn quality(&self, vertices: &[f64]) -> Vec<f64> {
        (0..self.num_cells())
            .map(|e| self.cell_quality(e, vertices))
            .collect()
    }

    fn cell_quality(&self, e: usize, vertices: &[f64]) -> f64 {
        let nodes = self.cell_nodes(e, vertices);
        let dim = self.dim;
        let p = |a: usize| &nodes[a * dim..(a + 1) * dim];
        let len = |a: usize, b: usize| {
            p(a).iter()
                .zip(p(b).iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt()
        };
        match self.kind {
            ElementKind::Triangle => {
                let jac = self.corner_jacobians(e, vertices)[0];
                let (l0, l1, l2) = (len(0, 1), len(1, 2), len(2, 0));
                let lmax = (l0 * l1).max(l1 * l2).max(l2 * l0);
                jac * (2.0 / 3.0_f64.sqrt()) / lmax
            }
            ElementKind::Tetrahedron => {
                let jac = self.corner_jacobians(e, vertices)[0];
                let l = [len(0, 1), len(1, 2), len(2, 0), len(0, 3), len(1, 3), len(2, 3)];
                let lmax = (l[0] * l[2] * l[3])
                    .max(l[0] * l[1] * l[4])
                    .max(l[1] * l[2] * l[5])
                    .max(l[3] * l[4] * l[5])
                    .max(jac);
                jac * 2.0_f64.sqrt() / lmax
            }
            ElementKind::Quad | ElementKind::Hexahedron => {
                let jacs = self.corner_jacobians(e, vertices);
                jacs.iter()
                    .enumerate()
                    .map(|(c, &j)| {
                        let prod: f64 = self
                            .kind
                            .corner_neighbours(c)
                            .iter()
                            .map(|&nb| len(c, nb))
                            .product();
                        j / prod
                    })
                    .fold(f64::INFINITY, f64::min)
            }
        }
    }

    /// Extracts the cells of one body with compacted vertex numbering.
    pub fn submesh(&self, body_id: usize) -> Mesh {
        let mut map = vec![usize::MAX; self.num_vertices()];
        let mut vertices = Vec::new();
        let mut cells = Vec::new();
        let mut num = 0;
        for (e, cell) in self.cell_iter().enumerate() {
            if self.body_ids[e] != body_id {
                continue;
            }
            for &v in cell {
                if map[v] == usize::MAX {
                    map[v] = num;
                    num += 1;
                    vertices.extend_from_slice(self.vertex(v));
                }
                cells.push(map[v]);
            }
        }
        let num_cells = cells.len() / self.kind.num_nodes();
        let facet_tags = self
            .facet_tags
            .iter()
            .filter(|(k, _)| k.iter().all(|&v| map[v] != usize::MAX))
            .map(|(k, &t)| (sorted(&k.iter().map(|&v| map[v]).collect::<Vec<_>>()), t))
            .collect();
        Mesh {
            dim: self.dim,
            kind: self.kind,
            vertices,
            cells,
            body_ids: vec![body_id; num_cells],
            facet_tags,
        }
    }

    /// Concatenates meshes of the same kind.
    pub fn merge(meshes: &[Mesh]) -> Result<Mesh, Error> {
        let first = meshes.first().ok_or(Error::SizeMismatch)?;
        let mut out = Mesh {
            dim: first.dim,
            kind: first.kind,
            vertices: Vec::new(),
            cells: Vec::new(),
            body_ids: Vec::new(),
            facet_tags: AHashMap::default(),
        };
        for m in meshes {
            if m.kind != out.kind {
                return Err(Error::InvalidParameter {
                    name: "kind".to_string(),
                });
            }
            let offset = out.num_vertices();
            out.vertices.extend_from_slice(&m.vertices);
            out.cells.extend(m.cells.iter().map(|&v| v + offset));
            out.body_ids.extend_from_slice(&m.body_ids);
            for (k, &t) in m.facet_tags.iter() {
                out.facet_tags
                    .insert(k.iter().map(|&v| v + offset).collect(), t);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use approx::assert_relative_eq;

    #[test]
    fn square_boundary() {
        let mesh = unit_square_tri_mesh(2);
        assert_eq!(mesh.boundary_facets().len(), 8);
        assert_eq!(mesh.boundary_vertices().len(), 8);
        assert!(!mesh.is_flipped(&mesh.vertices));
    }

    #[test]
    fn cube_boundary() {
        let mesh = unit_cube_tet_mesh();
        assert_eq!(mesh.boundary_facets().len(), 12);
        assert!(!mesh.is_flipped(&mesh.vertices));
    }

    #[test]
    fn regular_elements_have_unit_quality() {
        let s3 = 3.0_f64.sqrt();
        let tri = Mesh::new(ElementKind::Triangle, vec![0.0, 0.0, 1.0, 0.0, 0.5, 0.5 * s3], vec![0, 1, 2]).unwrap();
        assert_relative_eq!(tri.quality(&tri.vertices)[0], 1.0, epsilon = 1e-12);

        let tet = Mesh::new(
            ElementKind::Tetrahedron,
            vec![
                0.0, 0.0, 0.0,
                1.0, 0.0, 0.0,
                0.5, 0.5 * s3, 0.0,
                0.5, s3 / 6.0, (2.0_f64 / 3.0).sqrt(),
            ],
            vec![0, 1, 2, 3],
        )
        .unwrap();
        assert_relative_eq!(tet.quality(&tet.vertices)[0], 1.0, epsilon = 1e-12);

        let quad = unit_square_quad();
        assert_relative_eq!(quad.quality(&quad.vertices)[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn inverted_triangle_detected() {
        let mesh = one_triangle();
        let mut v = mesh.vertices.clone();
        // Push the apex through the opposite edge.
        v[5] = -1.0;
        assert!(mesh.is_flipped(&v));
        assert_eq!(mesh.inverted_cells(&v), vec![0]);
        assert!(mesh.quality(&v)[0] < 0.0);
    }

    #[test]
    fn submesh_and_merge() {
        let mesh = two_squares(0.1);
        let a = mesh.submesh(0);
        let b = mesh.submesh(1);
        assert_eq!(a.num_vertices(), 4);
        assert_eq!(b.num_cells(), 2);
        let merged = Mesh::merge(&[a, b]).unwrap();
        assert_eq!(merged.num_vertices(), mesh.num_vertices());
        assert_eq!(merged.num_cells(), mesh.num_cells());
        assert_eq!(merged.body_id_set(), vec![0, 1]);
    }
}
