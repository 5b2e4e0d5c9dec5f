//! Constitutive data and strain measures for hyperelastic energies.
//!
//! Strains and stresses are exchanged with the stiffness tensor in Voigt
//! notation: `[E00, E11, 2E01]` in 2D and `[E00, E11, E22, 2E12, 2E02, 2E01]`
//! in 3D.

mod saint_venant;

pub use saint_venant::*;

use crate::basis::Mat3;
use crate::dual::DiffScalar;
use crate::params::MaterialParams;
use crate::Error;

/// Maps tensor entries `(i, j)` to their Voigt index. `NONE` marks entries outside the block.
const NONE: usize = usize::MAX;
const VOIGT_2D: [[usize; 3]; 3] = [[0, 2, NONE], [2, 1, NONE], [NONE, NONE, NONE]];
const VOIGT_3D: [[usize; 3]; 3] = [[0, 5, 4], [5, 1, 3], [4, 3, 2]];

/// Symmetric stiffness tensor in Voigt notation, 3x3 in 2D and 6x6 in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct ElasticityTensor {
    dim: usize,
    entries: [[f64; 6]; 6],
}

fn check_dim(dim: usize) -> Result<(), Error> {
    if dim == 2 || dim == 3 {
        Ok(())
    } else {
        Err(Error::UnsupportedDimension { dim })
    }
}

impl ElasticityTensor {
    /// Isotropic tensor from Young's modulus and Poisson ratio. Planar problems use plane stress.
    pub fn from_young_poisson(dim: usize, young: f64, nu: f64) -> Result<Self, Error> {
        check_dim(dim)?;
        let nu_max = if dim == 2 { 1.0 } else { 0.5 };
        if !(young > 0.0) {
            return Err(Error::InvalidParameter {
                name: "young".to_string(),
            });
        }
        if !(nu > -1.0 && nu < nu_max) {
            return Err(Error::InvalidParameter {
                name: "nu".to_string(),
            });
        }
        let mut entries = [[0.0; 6]; 6];
        if dim == 2 {
            let k = young / (1.0 - nu * nu);
            entries[0][0] = k;
            entries[1][1] = k;
            entries[0][1] = k * nu;
            entries[1][0] = k * nu;
            entries[2][2] = k * (1.0 - nu) / 2.0;
        } else {
            let k = young / ((1.0 + nu) * (1.0 - 2.0 * nu));
            for i in 0..3 {
                for j in 0..3 {
                    entries[i][j] = if i == j { k * (1.0 - nu) } else { k * nu };
                }
                entries[i + 3][i + 3] = k * (1.0 - 2.0 * nu) / 2.0;
            }
        }
        Ok(ElasticityTensor { dim, entries })
    }

    /// Isotropic tensor from the Lamé parameters.
    pub fn from_lame(dim: usize, lambda: f64, mu: f64) -> Result<Self, Error> {
        check_dim(dim)?;
        if !(mu > 0.0) {
            return Err(Error::InvalidParameter {
                name: "mu".to_string(),
            });
        }
        let mut entries = [[0.0; 6]; 6];
        for i in 0..dim {
            for j in 0..dim {
                entries[i][j] = if i == j { 2.0 * mu + lambda } else { lambda };
            }
        }
        let size = if dim == 2 { 3 } else { 6 };
        for i in dim..size {
            entries[i][i] = mu;
        }
        Ok(ElasticityTensor { dim, entries })
    }

    /// General tensor from its upper triangle listed row by row: 6 entries in 2D, 21 in 3D.
    pub fn from_entries(dim: usize, upper: &[f64]) -> Result<Self, Error> {
        check_dim(dim)?;
        let size = if dim == 2 { 3 } else { 6 };
        if upper.len() != size * (size + 1) / 2 {
            return Err(Error::InvalidParameter {
                name: "elasticity_tensor".to_string(),
            });
        }
        let mut entries = [[0.0; 6]; 6];
        let mut it = upper.iter();
        for i in 0..size {
            for j in i..size {
                if let Some(&v) = it.next() {
                    entries[i][j] = v;
                    entries[j][i] = v;
                }
            }
        }
        Ok(ElasticityTensor { dim, entries })
    }

    pub fn from_params(dim: usize, params: &MaterialParams) -> Result<Self, Error> {
        match *params {
            MaterialParams::YoungPoisson { young, nu } => Self::from_young_poisson(dim, young, nu),
            MaterialParams::Lame { lambda, mu } => Self::from_lame(dim, lambda, mu),
            MaterialParams::Tensor { ref entries } => Self::from_entries(dim, entries),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of Voigt components.
    pub fn size(&self) -> usize {
        if self.dim == 2 {
            3
        } else {
            6
        }
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.entries[i][j]
    }

    fn voigt_map(&self) -> &'static [[usize; 3]; 3] {
        if self.dim == 2 {
            &VOIGT_2D
        } else {
            &VOIGT_3D
        }
    }

    /// Second Piola-Kirchhoff stress `S = C : E` for the Green strain `E`.
    pub fn second_pk_stress<T: DiffScalar>(&self, strain: &Mat3<T>) -> Mat3<T> {
        let n = self.size();
        let map = self.voigt_map();
        let mut eps: [T; 6] = std::array::from_fn(|_| T::zero());
        for i in 0..self.dim {
            for j in i..self.dim {
                let k = map[i][j];
                eps[k] = if i == j {
                    strain[i][j].clone()
                } else {
                    strain[i][j].clone().scale(2.0)
                };
            }
        }
        let sigma: [T; 6] = std::array::from_fn(|i| {
            let mut acc = T::zero();
            if i < n {
                for (j, e) in eps.iter().enumerate().take(n) {
                    let c = self.entries[i][j];
                    if c != 0.0 {
                        acc = acc + e.clone().scale(c);
                    }
                }
            }
            acc
        });
        std::array::from_fn(|i| {
            std::array::from_fn(|j| match map[i][j] {
                NONE => T::zero(),
                k => sigma[k].clone(),
            })
        })
    }

    /// Energy density `½ tr(S E)` for the displacement gradient `grad_u`.
    pub fn energy_density<T: DiffScalar>(&self, grad_u: &Mat3<T>) -> T {
        let strain = green_strain(grad_u, self.dim);
        let stress = self.second_pk_stress(&strain);
        let mut tr = T::zero();
        for i in 0..self.dim {
            for j in 0..self.dim {
                tr = tr + stress[i][j].clone() * strain[j][i].clone();
            }
        }
        tr.scale(0.5)
    }
}

/// Green-Lagrange strain `½(∇u + ∇uᵀ + ∇uᵀ∇u)`.
pub fn green_strain<T: DiffScalar>(grad_u: &Mat3<T>, dim: usize) -> Mat3<T> {
    std::array::from_fn(|i| {
        std::array::from_fn(|j| {
            if i >= dim || j >= dim {
                return T::zero();
            }
            let mut e = grad_u[i][j].clone() + grad_u[j][i].clone();
            for k in 0..dim {
                e = e + grad_u[k][i].clone() * grad_u[k][j].clone();
            }
            e.scale(0.5)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn young_poisson_matches_lame() {
        let (young, nu) = (200.0, 0.25);
        let lambda = young * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
        let mu = young / (2.0 * (1.0 + nu));
        let a = ElasticityTensor::from_young_poisson(3, young, nu).unwrap();
        let b = ElasticityTensor::from_lame(3, lambda, mu).unwrap();
        for i in 0..6 {
            for j in 0..6 {
                assert_relative_eq!(a.get(i, j), b.get(i, j), epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn entries_are_symmetric() {
        let c = ElasticityTensor::from_entries(2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(c.get(0, 1), 2.0);
        assert_eq!(c.get(1, 0), 2.0);
        assert_eq!(c.get(2, 1), 5.0);
        assert_eq!(c.get(2, 2), 6.0);
        assert!(ElasticityTensor::from_entries(3, &[1.0; 6]).is_err());
        assert!(ElasticityTensor::from_entries(4, &[1.0; 6]).is_err());
    }

    #[test]
    fn invalid_poisson_ratio() {
        assert!(ElasticityTensor::from_young_poisson(3, 1.0, 0.5).is_err());
        assert!(ElasticityTensor::from_young_poisson(2, 1.0, 0.7).is_ok());
        assert!(ElasticityTensor::from_young_poisson(2, -1.0, 0.3).is_err());
    }

    #[test]
    fn rotation_has_zero_strain() {
        let (c, s) = (0.3_f64.cos(), 0.3_f64.sin());
        // ∇u = R - I
        let grad_u = [[c - 1.0, -s, 0.0], [s, c - 1.0, 0.0], [0.0, 0.0, 0.0]];
        let e = green_strain::<f64>(&grad_u, 2);
        for row in e.iter() {
            for v in row.iter() {
                assert_relative_eq!(*v, 0.0, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn uniaxial_lame_stress() {
        let c = ElasticityTensor::from_lame(3, 1.0, 2.0).unwrap();
        let mut e = [[0.0; 3]; 3];
        e[0][0] = 0.1;
        e[1][2] = 0.05;
        e[2][1] = 0.05;
        let s = c.second_pk_stress::<f64>(&e);
        // S = λ tr(E) I + 2μ E
        assert_relative_eq!(s[0][0], 0.1 + 4.0 * 0.1);
        assert_relative_eq!(s[1][1], 0.1);
        assert_relative_eq!(s[1][2], 4.0 * 0.05);
        assert_relative_eq!(s[2][1], 4.0 * 0.05);
        assert_relative_eq!(s[0][1], 0.0);
    }
}
