//! Read-only-after-init slot holding the serving model.

use crate::forecast::{ForecastBackend, ForecastError, Forecaster};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::info;

#[derive(Debug, thiserror::Error)]
#[error("a model is already installed")]
pub struct AlreadyInstalled;

/// Holds the model shared by every request.
///
/// The slot is written at most once; afterwards readers clone the `Arc`
/// without locking. Swapping models at runtime would replace this with an
/// atomically swapped `Arc`.
#[derive(Default)]
pub struct ModelRegistry {
    slot: OnceLock<Arc<dyn Forecaster>>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_model(model: Arc<dyn Forecaster>) -> Self {
        let registry = Self::empty();
        // a fresh slot is always empty
        let _ = registry.slot.set(model);
        registry
    }

    /// Loads the artifact at `path` with `backend`.
    pub fn load<B: ForecastBackend>(backend: &B, path: &Path) -> Result<Self, ForecastError> {
        let model = backend.load(path)?;
        info!(path = %path.display(), "model loaded");
        Ok(Self::with_model(Arc::new(model)))
    }

    pub fn install(&self, model: Arc<dyn Forecaster>) -> Result<(), AlreadyInstalled> {
        self.slot.set(model).map_err(|_| AlreadyInstalled)
    }

    pub fn get(&self) -> Option<Arc<dyn Forecaster>> {
        self.slot.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{Forecast, ForecastInput};

    struct Flat;

    impl Forecaster for Flat {
        fn predict(&self, _input: &ForecastInput) -> Result<Forecast, ForecastError> {
            Ok(Forecast {
                yhat: 1.0,
                yhat_lower: 0.0,
                yhat_upper: 2.0,
            })
        }
    }

    #[test]
    fn slot_is_set_once() {
        let registry = ModelRegistry::empty();
        assert!(!registry.is_loaded());
        assert!(registry.get().is_none());

        registry.install(Arc::new(Flat)).unwrap();
        assert!(registry.is_loaded());
        assert!(registry.install(Arc::new(Flat)).is_err());
    }

    #[test]
    fn missing_artifact_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = crate::forecast::SeasonalRegressionBackend::default();
        let err = ModelRegistry::load(&backend, &dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ForecastError::Io { .. }));
    }
}
