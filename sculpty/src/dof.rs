//! Mapping between the full DOF space and the reduced space of unknowns
//! left after eliminating Dirichlet constrained entries.

use serde::{Deserialize, Serialize};

/// Coordinate space in which a problem exposes its variables.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateMode {
    /// Every DOF is a variable. Prescribed entries are expected to be held by the caller.
    Full,
    /// Prescribed DOFs are removed from the variable vector.
    Reduced,
}

impl Default for CoordinateMode {
    fn default() -> Self {
        CoordinateMode::Reduced
    }
}

/// Fixed linear projection between full and reduced DOF vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct DofMap {
    full_size: usize,
    /// Sorted, unique prescribed DOF indices.
    boundary: Vec<usize>,
    /// Reduced index of every full DOF, `None` for prescribed ones.
    full_to_reduced: Vec<Option<usize>>,
}

impl DofMap {
    /// Builds the map for a full space of `full_size` DOFs.
    ///
    /// # Panics
    ///
    /// Panics if a boundary index is out of range.
    pub fn new(full_size: usize, boundary: impl IntoIterator<Item = usize>) -> DofMap {
        let mut boundary: Vec<usize> = boundary.into_iter().collect();
        boundary.sort_unstable();
        boundary.dedup();
        if let Some(&last) = boundary.last() {
            assert!(
                last < full_size,
                "boundary DOF {} out of range for {} DOFs",
                last,
                full_size
            );
        }
        let mut full_to_reduced = vec![None; full_size];
        let mut b = boundary.iter().peekable();
        let mut next = 0;
        for (i, slot) in full_to_reduced.iter_mut().enumerate() {
            if b.peek() == Some(&&i) {
                b.next();
            } else {
                *slot = Some(next);
                next += 1;
            }
        }
        DofMap {
            full_size,
            boundary,
            full_to_reduced,
        }
    }

    pub fn full_size(&self) -> usize {
        self.full_size
    }

    pub fn reduced_size(&self) -> usize {
        self.full_size - self.boundary.len()
    }

    /// Prescribed DOF indices in increasing order.
    pub fn boundary(&self) -> &[usize] {
        &self.boundary
    }

    pub fn is_boundary(&self, dof: usize) -> bool {
        self.full_to_reduced[dof].is_none()
    }

    /// Reduced index of a full DOF.
    pub fn reduced_index(&self, dof: usize) -> Option<usize> {
        self.full_to_reduced[dof]
    }

    /// Drops the prescribed entries of `full`.
    pub fn full_to_reduced(&self, full: &[f64]) -> Vec<f64> {
        assert_eq!(full.len(), self.full_size, "full vector size mismatch");
        full.iter()
            .zip(self.full_to_reduced.iter())
            .filter_map(|(&v, r)| r.map(|_| v))
            .collect()
    }

    /// Scatters `reduced` into a full vector, filling prescribed entries from
    /// `boundary_values`, which is ordered like [`DofMap::boundary`].
    pub fn reduced_to_full(&self, reduced: &[f64], boundary_values: &[f64]) -> Vec<f64> {
        assert_eq!(reduced.len(), self.reduced_size(), "reduced vector size mismatch");
        assert_eq!(
            boundary_values.len(),
            self.boundary.len(),
            "boundary value count mismatch"
        );
        let mut full = vec![0.0; self.full_size];
        for (dof, r) in self.full_to_reduced.iter().enumerate() {
            if let Some(r) = r {
                full[dof] = reduced[*r];
            }
        }
        for (&dof, &v) in self.boundary.iter().zip(boundary_values.iter()) {
            full[dof] = v;
        }
        full
    }

    /// Removes the rows and columns of prescribed DOFs from a full sparse matrix.
    pub fn reduce_hessian(&self, full: &sprs::CsMat<f64>) -> sprs::CsMat<f64> {
        assert_eq!(full.rows(), self.full_size, "hessian row count mismatch");
        assert_eq!(full.cols(), self.full_size, "hessian column count mismatch");
        let n = self.reduced_size();
        let mut reduced = sprs::TriMat::with_capacity((n, n), full.nnz());
        for (&val, (row, col)) in full.iter() {
            if let (Some(r), Some(c)) = (self.full_to_reduced[row], self.full_to_reduced[col]) {
                reduced.add_triplet(r, c, val);
            }
        }
        reduced.to_csr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Triplet;

    #[test]
    fn round_trip_restores_free_entries() {
        let map = DofMap::new(6, vec![4, 1, 4]);
        assert_eq!(map.boundary(), &[1, 4]);
        assert_eq!(map.reduced_size(), 4);
        let v = vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5];
        let r = map.full_to_reduced(&v);
        assert_eq!(r, vec![0.5, 2.5, 3.5, 5.5]);
        let full = map.reduced_to_full(&r, &[-1.0, -4.0]);
        assert_eq!(full, vec![0.5, -1.0, 2.5, 3.5, -4.0, 5.5]);
    }

    #[test]
    fn empty_boundary_is_identity() {
        let map = DofMap::new(3, Vec::new());
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(map.full_to_reduced(&v), v);
        assert_eq!(map.reduced_to_full(&v, &[]), v);
    }

    #[test]
    fn hessian_reduction_drops_rows_and_columns() {
        let triplets: Vec<_> = (0..3)
            .flat_map(|i| (0..3).map(move |j| Triplet::new(i, j, (3 * i + j + 1) as f64)))
            .collect();
        let full = crate::triplets_to_csr(3, 3, &triplets);
        let map = DofMap::new(3, vec![1]);
        let h = map.reduce_hessian(&full);
        assert_eq!(h.rows(), 2);
        assert_eq!(h.get(0, 0), Some(&1.0));
        assert_eq!(h.get(0, 1), Some(&3.0));
        assert_eq!(h.get(1, 0), Some(&7.0));
        assert_eq!(h.get(1, 1), Some(&9.0));
    }

    #[test]
    #[should_panic]
    fn out_of_range_boundary_panics() {
        let _ = DofMap::new(3, vec![3]);
    }

    #[test]
    #[should_panic]
    fn wrong_size_panics() {
        let map = DofMap::new(3, vec![0]);
        let _ = map.full_to_reduced(&[1.0, 2.0]);
    }
}
