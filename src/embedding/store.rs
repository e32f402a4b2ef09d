//! Index-addressed entity and predicate embedding tables.
//!
//! Both tables have shape `[vocab_size + 1, dim]`; row 0 is the sentinel row
//! for index 0 and is never looked up by a real fact. Other components refer
//! to rows by index and never own copies of them.

use crate::error::{AdvError, Result};
use candle_core::{DType, Device, Tensor, Var};
use rand::Rng;

/// Xavier/Glorot uniform initialization: `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_uniform(rows: usize, cols: usize, rng: &mut impl Rng, device: &Device) -> Result<Tensor> {
    let limit = (6.0 / (rows + cols) as f64).sqrt() as f32;
    let data: Vec<f32> = (0..rows * cols)
        .map(|_| rng.random_range(-limit..=limit))
        .collect();
    Ok(Tensor::from_vec(data, (rows, cols), device)?)
}

/// Owner of the trainable entity and predicate tables.
pub struct EmbeddingStore {
    /// Entity embeddings: [nb_entities + 1, entity_dim]
    entities: Var,
    /// Predicate embeddings: [nb_predicates + 1, predicate_dim]
    predicates: Var,
    device: Device,
}

impl EmbeddingStore {
    /// Create Xavier-initialized tables.
    pub fn new(
        nb_entities: usize,
        nb_predicates: usize,
        entity_dim: usize,
        predicate_dim: usize,
        rng: &mut impl Rng,
        device: &Device,
    ) -> Result<Self> {
        let entities = xavier_uniform(nb_entities + 1, entity_dim, rng, device)?;
        let predicates = xavier_uniform(nb_predicates + 1, predicate_dim, rng, device)?;
        Self::from_tensors(&entities, &predicates)
    }

    /// Wrap existing tables, e.g. ones loaded from a saved model.
    pub fn from_tensors(entities: &Tensor, predicates: &Tensor) -> Result<Self> {
        if entities.rank() != 2 || predicates.rank() != 2 {
            return Err(AdvError::Config(format!(
                "embedding tables must be matrices, got {:?} and {:?}",
                entities.dims(),
                predicates.dims()
            )));
        }
        Ok(Self {
            entities: Var::from_tensor(&entities.to_dtype(DType::F32)?)?,
            predicates: Var::from_tensor(&predicates.to_dtype(DType::F32)?)?,
            device: entities.device().clone(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn entities(&self) -> &Var {
        &self.entities
    }

    pub fn predicates(&self) -> &Var {
        &self.predicates
    }

    pub fn nb_entities(&self) -> usize {
        self.entities.dims()[0] - 1
    }

    pub fn nb_predicates(&self) -> usize {
        self.predicates.dims()[0] - 1
    }

    pub fn entity_dim(&self) -> usize {
        self.entities.dims()[1]
    }

    pub fn predicate_dim(&self) -> usize {
        self.predicates.dims()[1]
    }

    fn index_tensor(&self, indices: &[u32]) -> Result<Tensor> {
        Ok(Tensor::from_slice(indices, (indices.len(),), &self.device)?)
    }

    /// Gather entity rows: [n, entity_dim]
    pub fn entity_rows(&self, indices: &[u32]) -> Result<Tensor> {
        let idx = self.index_tensor(indices)?;
        Ok(self.entities.as_tensor().index_select(&idx, 0)?)
    }

    /// Gather single-predicate walks: [n, 1, predicate_dim]
    pub fn predicate_rows(&self, indices: &[u32]) -> Result<Tensor> {
        let idx = self.index_tensor(indices)?;
        Ok(self.predicates.as_tensor().index_select(&idx, 0)?.unsqueeze(1)?)
    }

    /// Gather equal-length predicate walks: [n, walk_len, predicate_dim]
    pub fn predicate_walks(&self, walks: &[Vec<u32>]) -> Result<Tensor> {
        let walk_len = walks.first().map_or(1, |w| w.len());
        if walk_len == 0 || walks.iter().any(|w| w.len() != walk_len) {
            return Err(AdvError::Config(
                "predicate walks in one batch must share a non-zero length".into(),
            ));
        }
        let flat: Vec<u32> = walks.iter().flatten().copied().collect();
        let idx = self.index_tensor(&flat)?;
        let rows = self.predicates.as_tensor().index_select(&idx, 0)?;
        Ok(rows.reshape((walks.len(), walk_len, self.predicate_dim()))?)
    }

    /// Copies of both tables, for snapshots and diagnostics. A detached
    /// tensor still shares storage with its `Var`, so the data is copied.
    pub fn snapshot(&self) -> Result<(Tensor, Tensor)> {
        Ok((
            self.entities.as_tensor().detach().copy()?,
            self.predicates.as_tensor().detach().copy()?,
        ))
    }
}
