//! # oxweights
//!
//! Fetch, verify and bind published pretrained weights to image-classification models.
//!
//! ```no_run
//! use oxweights::{ModelTarget, Result, Scope, VariableSpec, WeightEntry, Zoo, ZooConfig};
//!
//! struct Net {
//!     params: Vec<Vec<f32>>,
//! }
//!
//! impl ModelTarget for Net {
//!     fn variables(&self, _scope: &Scope) -> Result<Vec<VariableSpec>> {
//!         Ok(vec![VariableSpec::default(); self.params.len()])
//!     }
//!
//!     fn assign(&mut self, _scope: &Scope, index: usize, weight: WeightEntry) -> Result<()> {
//!         self.params[index] = weight.data.to_f32();
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> oxweights::Result<()> {
//! let zoo = Zoo::new(ZooConfig::default())?;
//! let mut net = Net { params: vec![Vec::new(); 52] };
//!
//! zoo.pretrained(&mut net, "squeezenet").await.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod assign;
pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod loader;
pub mod registry;
pub mod rules;
pub mod scope;
pub mod weights;

pub use assign::{assign_weights, Assignment, ModelTarget, VariableSpec};
pub use cache::{ArchiveCache, ArchiveDescriptor, ContentHash, Fetch, HashAlgorithm, HttpFetcher};
pub use config::{ArchiveUrls, ZooConfig};
pub use error::{Result, ZooError};
pub use format::ArchiveFormat;
pub use loader::{LoadOptions, LoadPhase, LoadProgress, LoadReport, ScopeOutcome, ScopeStatus};
pub use registry::{MatchKind, ModelEntry, Registry, Resolution};
pub use rules::{MoveRule, RuleTemplate};
pub use scope::{IntoScopes, Scope};
pub use weights::{DType, TensorData, WeightEntry, WeightGroup};

use std::sync::Arc;

use tracing::{error, info, warn};

use loader::load_entry;

/// Registry, cache and options bundled behind one entry point.
pub struct Zoo {
    registry: Arc<Registry>,
    cache: ArchiveCache,
    options: LoadOptions,
}

impl Zoo {
    /// Standard registry over HTTP.
    pub fn new(config: ZooConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new()?);
        Ok(Self::with_fetcher(config, fetcher))
    }

    pub fn with_fetcher(config: ZooConfig, fetcher: Arc<dyn Fetch>) -> Self {
        let registry = Arc::new(Registry::standard(&config.urls));
        let cache = ArchiveCache::new(config.cache_root, fetcher).with_retries(config.retries);
        Self {
            registry,
            cache,
            options: LoadOptions::default(),
        }
    }

    pub fn with_registry(mut self, registry: impl Into<Arc<Registry>>) -> Self {
        self.registry = registry.into();
        self
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    /// Load pretrained weights for every scope, in order.
    ///
    /// A scope whose model name matches nothing in the registry is not an error: a
    /// warning is logged and the target is asked to initialize it. A failure in one
    /// scope does not stop the others; check the returned report.
    pub async fn pretrained<T: ModelTarget + ?Sized>(
        &self,
        target: &mut T,
        scopes: impl IntoScopes,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for scope in scopes.into_scopes() {
            let status = self.load_scope(target, &scope).await;
            report.outcomes.push(ScopeOutcome { scope, status });
        }
        report
    }

    /// Load a specific registry entry into `scope`, bypassing name resolution.
    pub async fn load_model<T: ModelTarget + ?Sized>(
        &self,
        target: &mut T,
        model: &str,
        scope: &Scope,
    ) -> Result<usize> {
        let entry = self
            .registry
            .get(model)
            .ok_or_else(|| ZooError::ModelNotFound(model.to_string()))?;
        load_entry(entry, scope, &self.cache, target, &self.options).await
    }

    async fn load_scope<T: ModelTarget + ?Sized>(&self, target: &mut T, scope: &Scope) -> ScopeStatus {
        let model_name = scope.model_name();
        match self.registry.resolve(model_name) {
            Resolution::Found { entry, kind } => {
                if kind == MatchKind::Substring {
                    info!("{scope}: using {} weights for {model_name}", entry.name);
                }
                match load_entry(entry, scope, &self.cache, target, &self.options).await {
                    Ok(weights) => ScopeStatus::Loaded {
                        model: entry.name.clone(),
                        kind,
                        weights,
                    },
                    Err(e) => {
                        error!("{scope}: {e}");
                        ScopeStatus::Failed(e)
                    }
                }
            }
            Resolution::Missing => {
                warn!(
                    "Random initialization will be performed because the pre-trained weights for {model_name} are not found."
                );
                match target.initialize(scope) {
                    Ok(()) => ScopeStatus::NotFound,
                    Err(e) => ScopeStatus::Failed(e),
                }
            }
        }
    }
}
