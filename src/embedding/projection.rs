//! Geometric constraints restored after every optimizer step.
//!
//! Entity rows (and the adversary's violating embeddings) live either on the
//! unit L2 sphere or in the unit cube `[-1, 1]^k`. Predicate rows may be
//! norm-capped. Pinned "all-ones" entities are overwritten after projection.

use super::store::EmbeddingStore;
use crate::error::Result;
use candle_core::{Device, Tensor, Var, D};
use serde::{Deserialize, Serialize};

/// Region entity embeddings are projected onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityConstraint {
    /// `v <- v / ||v||_2`
    #[default]
    UnitSphere,
    /// `v <- clamp(v, -1, 1)`
    UnitCube,
}

/// L2 norm of each row along the last dimension, keeping that dimension.
fn row_norms(t: &Tensor) -> Result<Tensor> {
    Ok(t.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?)
}

/// Rescale every row to unit L2 norm. Zero rows are left unchanged.
pub fn unit_sphere(t: &Tensor) -> Result<Tensor> {
    let norms = row_norms(t)?;
    // Divide zero rows by one instead of zero.
    let zero = norms.eq(&norms.zeros_like()?)?.to_dtype(norms.dtype())?;
    Ok(t.broadcast_div(&(norms + zero)?)?)
}

/// Clamp every coordinate into `[-1, 1]`.
pub fn unit_cube(t: &Tensor) -> Result<Tensor> {
    Ok(t.clamp(-1f32, 1f32)?)
}

/// Scale down rows whose L2 norm exceeds `max_norm`; shorter rows are kept.
pub fn renorm(t: &Tensor, max_norm: f64) -> Result<Tensor> {
    let norms = row_norms(t)?;
    let scale = (norms.recip()? * max_norm)?.clamp(0f32, 1f32)?;
    Ok(t.broadcast_mul(&scale)?)
}

/// The projection step applied after each discriminator and adversary update.
#[derive(Debug, Clone)]
pub struct Projector {
    constraint: EntityConstraint,
    predicate_norm: Option<f64>,
    /// Entity indices pinned to the all-ones vector
    all_ones: Vec<u32>,
    /// [nb_entities + 1, 1] indicator of pinned rows
    all_ones_mask: Option<Tensor>,
}

impl Projector {
    pub fn new(
        constraint: EntityConstraint,
        predicate_norm: Option<f64>,
        all_ones: Vec<u32>,
        nb_entity_rows: usize,
        device: &Device,
    ) -> Result<Self> {
        let all_ones_mask = if all_ones.is_empty() {
            None
        } else {
            let mut mask = vec![0f32; nb_entity_rows];
            for &idx in &all_ones {
                if let Some(m) = mask.get_mut(idx as usize) {
                    *m = 1.0;
                }
            }
            Some(Tensor::from_vec(mask, (nb_entity_rows, 1), device)?)
        };
        Ok(Self {
            constraint,
            predicate_norm,
            all_ones,
            all_ones_mask,
        })
    }

    pub fn constraint(&self) -> EntityConstraint {
        self.constraint
    }

    pub fn all_ones(&self) -> &[u32] {
        &self.all_ones
    }

    /// The geometric projection alone.
    pub fn project(&self, t: &Tensor) -> Result<Tensor> {
        match self.constraint {
            EntityConstraint::UnitSphere => unit_sphere(t),
            EntityConstraint::UnitCube => unit_cube(t),
        }
    }

    /// Project a free variable in place (used for violating embeddings).
    pub fn project_var(&self, var: &Var) -> Result<()> {
        let projected = self.project(var.as_tensor())?;
        var.set(&projected)?;
        Ok(())
    }

    /// Project the entity table, pin all-ones rows, then cap predicate norms.
    pub fn project_store(&self, store: &EmbeddingStore) -> Result<()> {
        let mut entities = self.project(store.entities().as_tensor())?;
        if let Some(mask) = &self.all_ones_mask {
            let keep = mask.affine(-1.0, 1.0)?;
            entities = entities.broadcast_mul(&keep)?.broadcast_add(mask)?;
        }
        store.entities().set(&entities)?;

        if let Some(norm) = self.predicate_norm {
            let predicates = renorm(store.predicates().as_tensor(), norm)?;
            store.predicates().set(&predicates)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rows(t: &Tensor) -> Vec<Vec<f32>> {
        t.to_vec2().unwrap()
    }

    #[test]
    fn test_unit_sphere_three_four_five() {
        let t = Tensor::new(&[[3f32, 4.0]], &Device::Cpu).unwrap();
        let p = rows(&unit_sphere(&t).unwrap());
        assert_abs_diff_eq!(p[0][0], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(p[0][1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_unit_sphere_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let t = crate::embedding::xavier_uniform(16, 5, &mut rng, &Device::Cpu).unwrap();
        let once = unit_sphere(&t).unwrap();
        let twice = unit_sphere(&once).unwrap();
        for (a, b) in rows(&once).iter().flatten().zip(rows(&twice).iter().flatten()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_unit_sphere_keeps_zero_rows() {
        let t = Tensor::new(&[[0f32, 0.0], [0.0, 2.0]], &Device::Cpu).unwrap();
        let p = rows(&unit_sphere(&t).unwrap());
        assert_eq!(p, vec![vec![0.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_unit_cube_bounds_and_idempotence() {
        let t = Tensor::new(&[[3f32, -0.5, -7.0], [0.25, 1.0, -1.5]], &Device::Cpu).unwrap();
        let once = unit_cube(&t).unwrap();
        assert!(rows(&once).iter().flatten().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(rows(&once), rows(&unit_cube(&once).unwrap()));
    }

    #[test]
    fn test_renorm_caps_long_rows_only() {
        let t = Tensor::new(&[[3f32, 4.0], [0.3, 0.4], [0.0, 0.0]], &Device::Cpu).unwrap();
        let p = rows(&renorm(&t, 1.0).unwrap());
        assert_abs_diff_eq!(p[0][0], 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1][1], 0.4, epsilon = 1e-6);
        assert_eq!(p[2], vec![0.0, 0.0]);
    }

    #[test]
    fn test_all_ones_rows_are_pinned() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let store = EmbeddingStore::new(4, 1, 3, 3, &mut rng, &Device::Cpu).unwrap();
        let projector =
            Projector::new(EntityConstraint::UnitSphere, None, vec![2], 5, &Device::Cpu).unwrap();
        projector.project_store(&store).unwrap();

        let table = rows(store.entities().as_tensor());
        assert_eq!(table[2], vec![1.0, 1.0, 1.0]);
        let norm: f32 = table[1].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-5);
    }
}
