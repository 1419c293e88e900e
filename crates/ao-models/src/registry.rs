use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use ao_types::{AoError, AoResult, EngineConfig, Family, ModelComponent};

use crate::artifact::{Artifact, ArtifactState};
use crate::mlp::Mlp;
use crate::normalizer::Normalizer;

/// Forward and inverse surrogates for one family. Each piece is independently optional.
#[derive(Debug, Clone)]
pub struct FamilyModels {
    pub family: Family,
    pub forward: Artifact<Mlp>,
    pub forward_normalizer: Artifact<Normalizer>,
    pub inverse: Artifact<Mlp>,
    pub inverse_input_normalizer: Artifact<Normalizer>,
    pub inverse_output_normalizer: Artifact<Normalizer>,
}

impl FamilyModels {
    pub fn load(models_dir: &Path, family: Family) -> Self {
        let path = |component: ModelComponent| models_dir.join(component.file_name(family));
        Self {
            family,
            forward: Artifact::load(path(ModelComponent::ForwardModel)),
            forward_normalizer: Artifact::load(path(ModelComponent::ForwardNormalizer)),
            inverse: Artifact::load(path(ModelComponent::InverseModel)),
            inverse_input_normalizer: Artifact::load(path(ModelComponent::InverseInputNormalizer)),
            inverse_output_normalizer: Artifact::load(path(ModelComponent::InverseOutputNormalizer)),
        }
    }

    /// Fully in-memory pair.
    pub fn from_parts(
        family: Family,
        forward: (Mlp, Normalizer),
        inverse: (Normalizer, Mlp, Normalizer),
    ) -> Self {
        Self {
            family,
            forward: Artifact::Loaded(forward.0),
            forward_normalizer: Artifact::Loaded(forward.1),
            inverse: Artifact::Loaded(inverse.1),
            inverse_input_normalizer: Artifact::Loaded(inverse.0),
            inverse_output_normalizer: Artifact::Loaded(inverse.2),
        }
    }

    pub fn state(&self, component: ModelComponent) -> ArtifactState {
        match component {
            ModelComponent::ForwardModel => self.forward.state(),
            ModelComponent::ForwardNormalizer => self.forward_normalizer.state(),
            ModelComponent::InverseModel => self.inverse.state(),
            ModelComponent::InverseInputNormalizer => self.inverse_input_normalizer.state(),
            ModelComponent::InverseOutputNormalizer => self.inverse_output_normalizer.state(),
        }
    }

    pub fn unavailable_components(&self) -> Vec<ModelComponent> {
        ModelComponent::ALL
            .into_iter()
            .filter(|c| self.state(*c) != ArtifactState::Loaded)
            .collect()
    }

    pub fn forward_pair(&self) -> AoResult<(&Mlp, &Normalizer)> {
        let model = self.forward.require(self.family, ModelComponent::ForwardModel)?;
        let normalizer = self
            .forward_normalizer
            .require(self.family, ModelComponent::ForwardNormalizer)?;
        Ok((model, normalizer))
    }

    pub fn inverse_triplet(&self) -> AoResult<(&Normalizer, &Mlp, &Normalizer)> {
        let input = self
            .inverse_input_normalizer
            .require(self.family, ModelComponent::InverseInputNormalizer)?;
        let model = self.inverse.require(self.family, ModelComponent::InverseModel)?;
        let output = self
            .inverse_output_normalizer
            .require(self.family, ModelComponent::InverseOutputNormalizer)?;
        Ok((input, model, output))
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub hits: u64,
    pub loads: u64,
}

/// Lazily loaded, never evicted per-family surrogate cache.
#[derive(Debug)]
pub struct ModelRegistry {
    models_dir: PathBuf,
    families: Vec<Family>,
    cache: DashMap<Family, Arc<FamilyModels>>,
    stats: RwLock<RegistryStats>,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>, families: Vec<Family>) -> Self {
        Self {
            models_dir: models_dir.into(),
            families,
            cache: DashMap::new(),
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.paths.models_dir.clone(), config.families.clone())
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    /// Cached models for `family`, loading them on first request.
    pub fn ensure(&self, family: Family) -> AoResult<Arc<FamilyModels>> {
        if !self.families.contains(&family) {
            return Err(AoError::UnknownFamily {
                name: family.name().to_string(),
            });
        }

        if let Some(models) = self.cache.get(&family) {
            self.stats.write().hits += 1;
            return Ok(Arc::clone(&models));
        }

        let models = self
            .cache
            .entry(family)
            .or_insert_with(|| {
                let models = FamilyModels::load(&self.models_dir, family);
                let unavailable = models.unavailable_components();
                if unavailable.is_empty() {
                    info!(family = %family, "Loaded surrogate models");
                } else {
                    let names: Vec<String> = unavailable.iter().map(|c| c.to_string()).collect();
                    warn!(family = %family, unavailable = ?names, "Surrogate models partially loaded");
                }
                self.stats.write().loads += 1;
                Arc::new(models)
            })
            .clone();
        Ok(models)
    }

    /// Parses `name` and delegates to [`ModelRegistry::ensure`].
    pub fn ensure_by_name(&self, name: &str) -> AoResult<Arc<FamilyModels>> {
        let family: Family = name.parse()?;
        self.ensure(family)
    }

    /// Installs pre-built models, replacing any cached entry.
    pub fn insert(&self, models: FamilyModels) -> AoResult<Arc<FamilyModels>> {
        if !self.families.contains(&models.family) {
            return Err(AoError::UnknownFamily {
                name: models.family.name().to_string(),
            });
        }
        let models = Arc::new(models);
        self.cache.insert(models.family, Arc::clone(&models));
        Ok(models)
    }

    pub fn is_cached(&self, family: Family) -> bool {
        self.cache.contains_key(&family)
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::write_json_atomic;
    use crate::mlp::{Activation, DenseLayer};
    use ndarray::{Array1, Array2};

    fn tiny_mlp(input: usize, output: usize) -> Mlp {
        let layer = DenseLayer::new(
            Array2::zeros((input, output)),
            Array1::zeros(output),
            Activation::Identity,
        )
        .unwrap();
        Mlp::new(vec![layer]).unwrap()
    }

    #[test]
    fn absent_directory_still_registers_family() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), vec![Family::PatchRect]);

        let models = registry.ensure(Family::PatchRect).unwrap();
        assert_eq!(models.unavailable_components().len(), 5);
        assert!(registry.is_cached(Family::PatchRect));

        let err = models.forward_pair().unwrap_err();
        assert!(matches!(
            err,
            AoError::ModelUnavailable {
                component: ModelComponent::ForwardModel,
                ..
            }
        ));
    }

    #[test]
    fn disabled_family_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), vec![Family::PatchRect]);

        assert!(matches!(
            registry.ensure(Family::Vivaldi),
            Err(AoError::UnknownFamily { .. })
        ));
        assert!(matches!(
            registry.ensure_by_name("horn"),
            Err(AoError::UnknownFamily { .. })
        ));
    }

    #[test]
    fn pieces_load_independently() {
        let dir = tempfile::tempdir().unwrap();
        let family = Family::Dipole;
        write_json_atomic(
            dir.path().join(ModelComponent::ForwardModel.file_name(family)),
            &tiny_mlp(5, 2),
        )
        .unwrap();
        write_json_atomic(
            dir.path().join(ModelComponent::ForwardNormalizer.file_name(family)),
            &Normalizer::identity(5),
        )
        .unwrap();

        let registry = ModelRegistry::new(dir.path(), Family::ALL.to_vec());
        let models = registry.ensure(family).unwrap();

        assert!(models.forward_pair().is_ok());
        assert_eq!(
            models.unavailable_components(),
            vec![
                ModelComponent::InverseModel,
                ModelComponent::InverseInputNormalizer,
                ModelComponent::InverseOutputNormalizer,
            ]
        );
        let err = models.inverse_triplet().unwrap_err();
        assert!(matches!(
            err,
            AoError::ModelUnavailable {
                component: ModelComponent::InverseInputNormalizer,
                ..
            }
        ));
    }

    #[test]
    fn second_ensure_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path(), vec![Family::Slot]);

        let a = registry.ensure(Family::Slot).unwrap();
        let b = registry.ensure(Family::Slot).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        let stats = registry.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 1);
    }
}
