/*!
 * Interfaces for global energies with first and second order derivatives. Implementing these
 * allows a quantity to be composed into an objective that is handed to an optimization solver.
 * All vectors are flat DOF vectors in the layout of the owning mesh.
 */

/// A single non-zero of a sparse matrix.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub val: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, val: f64) -> Self {
        Triplet { row, col, val }
    }
}

/// Builds a CSR matrix from triplets, summing duplicates.
pub fn triplets_to_csr(num_rows: usize, num_cols: usize, triplets: &[Triplet]) -> sprs::CsMat<f64> {
    let mut mat = sprs::TriMat::with_capacity((num_rows, num_cols), triplets.len());
    for t in triplets {
        mat.add_triplet(t.row, t.col, t.val);
    }
    mat.to_csr()
}

/// Energy trait. This trait provides the energy value that, for instance, may be used in the
/// objective function for an optimization algorithm.
pub trait Energy {
    /// Compute the energy of the configuration `x`.
    fn energy(&self, x: &[f64]) -> f64;
}

/// The energy gradient is required for optimization methods that require first order derivative
/// information, like Gradient Descent for instance.
pub trait EnergyGradient {
    /// Compute the change in energy with respect to change in configuration and add it to the
    /// given slice of global gradient values.
    fn add_energy_gradient(&self, x: &[f64], grad: &mut [f64]);

    /// Convenience wrapper allocating the gradient.
    fn energy_gradient(&self, x: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; x.len()];
        self.add_energy_gradient(x, &mut grad);
        grad
    }
}

/// Second order derivatives given as triplets with duplicates to be summed.
pub trait EnergyHessian {
    /// Append the scaled Hessian non-zeros of the energy at `x` to `triplets`.
    fn add_energy_hessian_triplets(&self, x: &[f64], scale: f64, triplets: &mut Vec<Triplet>);

    /// Construct the Hessian as a sparse matrix in CSR format.
    fn energy_hessian(&self, x: &[f64], scale: f64) -> sprs::CsMat<f64> {
        let mut triplets = Vec::new();
        self.add_energy_hessian_triplets(x, scale, &mut triplets);
        triplets_to_csr(x.len(), x.len(), &triplets)
    }
}
