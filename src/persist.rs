//! Model bundles and debug snapshots.
//!
//! A bundle saved under `prefix` is two files: `prefix.json` with the
//! command line, the configuration and both index maps, and
//! `prefix.safetensors` with the `entities` and `predicates` tables plus any
//! model parameters.

use crate::embedding::EmbeddingStore;
use crate::error::{AdvError, Result};
use crate::kb::Vocabulary;
use crate::model::{build_model, ScoringModel};
use crate::session::TrainingSession;
use crate::training::TrainConfig;
use candle_core::{Device, Tensor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const ENTITIES: &str = "entities";
const PREDICATES: &str = "predicates";

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Everything needed to rebuild a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub command_line: Option<String>,
    pub config: TrainConfig,
    pub vocabulary: Vocabulary,
}

pub struct ModelBundle {
    pub metadata: BundleMetadata,
    pub tensors: HashMap<String, Tensor>,
}

impl ModelBundle {
    pub fn from_session(session: &TrainingSession, command_line: Option<String>) -> Result<Self> {
        let (entities, predicates) = session.store().snapshot()?;
        let mut tensors = HashMap::new();
        tensors.insert(ENTITIES.to_string(), entities);
        tensors.insert(PREDICATES.to_string(), predicates);
        for (name, var) in session.model().params() {
            tensors.insert(name, var.as_tensor().detach().copy()?);
        }
        Ok(Self {
            metadata: BundleMetadata {
                command_line,
                config: session.config().clone(),
                vocabulary: session.vocab().clone(),
            },
            tensors,
        })
    }

    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        let prefix = prefix.as_ref();
        let json = with_suffix(prefix, ".json");
        fs::write(&json, serde_json::to_string_pretty(&self.metadata)?)?;
        let tensors = with_suffix(prefix, ".safetensors");
        candle_core::safetensors::save(&self.tensors, &tensors)?;
        debug!("saved model bundle to {} and {}", json.display(), tensors.display());
        Ok(())
    }

    pub fn load(prefix: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let prefix = prefix.as_ref();
        let metadata: BundleMetadata = serde_json::from_str(&fs::read_to_string(with_suffix(prefix, ".json"))?)?;
        let tensors = candle_core::safetensors::load(with_suffix(prefix, ".safetensors"), device)?;
        Ok(Self { metadata, tensors })
    }

    fn tensor(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| AdvError::Config(format!("model bundle has no '{name}' tensor")))
    }

    /// Rebuild the embedding store and the scoring model.
    pub fn restore(&self) -> Result<(EmbeddingStore, Box<dyn ScoringModel>)> {
        let store = EmbeddingStore::from_tensors(self.tensor(ENTITIES)?, self.tensor(PREDICATES)?)?;
        let config = &self.metadata.config;
        // Parameters are overwritten below, the seed only fixes their shapes.
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let model = build_model(
            config.model,
            config.similarity,
            store.entity_dim(),
            store.predicate_dim(),
            config.hidden_size,
            &mut rng,
            store.device(),
        )?;
        for (name, var) in model.params() {
            var.set(self.tensor(&name)?)?;
        }
        Ok((store, model))
    }
}

/// `{prefix}_{role}_{epoch}.safetensors`
pub fn snapshot_path(prefix: &Path, role: &str, epoch: usize) -> PathBuf {
    with_suffix(prefix, &format!("_{role}_{epoch}.safetensors"))
}

/// Write named tensors for offline inspection.
pub fn save_snapshot(path: &Path, tensors: Vec<(String, Tensor)>) -> Result<()> {
    let tensors: HashMap<String, Tensor> = tensors.into_iter().collect();
    candle_core::safetensors::save(&tensors, path)?;
    debug!("wrote snapshot {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::Triple;
    use crate::model::ModelKind;

    fn vocab() -> Vocabulary {
        Vocabulary::from_triples(&[Triple::new("a", "p", "b"), Triple::new("b", "q", "c")])
    }

    #[test]
    fn test_bundle_save_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("model");
        let config = TrainConfig {
            model: ModelKind::ErMlp,
            hidden_size: Some(5),
            entity_embedding_size: 4,
            ..TrainConfig::default()
        };
        let session = TrainingSession::new(config, vocab(), &[], &Device::Cpu).unwrap();
        ModelBundle::from_session(&session, Some("advset --train x".into()))
            .unwrap()
            .save(&prefix)
            .unwrap();
        assert!(dir.path().join("model.json").exists());
        assert!(dir.path().join("model.safetensors").exists());

        let loaded = ModelBundle::load(&prefix, &Device::Cpu).unwrap();
        assert_eq!(loaded.metadata.vocabulary, *session.vocab());
        assert_eq!(loaded.metadata.command_line.as_deref(), Some("advset --train x"));

        let (store, model) = loaded.restore().unwrap();
        let walks = vec![vec![1], vec![2]];
        let pairs = [(1, 2), (2, 3)];
        let before = session.scorer().score(&walks, &pairs).unwrap();
        let after = crate::model::FactScorer::new(&store, model.as_ref()).score(&walks, &pairs).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_snapshot_path() {
        let path = snapshot_path(Path::new("/tmp/run"), "adversary", 3);
        assert_eq!(path, PathBuf::from("/tmp/run_adversary_3.safetensors"));
    }

    #[test]
    fn test_missing_tensor_reported() {
        let bundle = ModelBundle {
            metadata: BundleMetadata {
                command_line: None,
                config: TrainConfig::default(),
                vocabulary: vocab(),
            },
            tensors: HashMap::new(),
        };
        assert!(matches!(bundle.restore(), Err(AdvError::Config(_))));
    }
}
