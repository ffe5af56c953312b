use tracing::{debug, info};

use crate::assign::{assign_weights, ModelTarget};
use crate::cache::ArchiveCache;
use crate::error::{Result, ZooError};
use crate::registry::{MatchKind, ModelEntry};
use crate::rules;
use crate::scope::Scope;
use crate::weights::flatten;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Download,
    Parse,
    Assign,
}

#[derive(Debug, Clone)]
pub struct LoadProgress {
    pub phase: LoadPhase,
    pub loaded: u64,
    pub total: u64,
    pub fraction: f64,
}

impl LoadProgress {
    fn new(phase: LoadPhase, loaded: u64, total: u64) -> Self {
        let fraction = if total > 0 {
            loaded as f64 / total as f64
        } else {
            0.0
        };
        Self {
            phase,
            loaded,
            total,
            fraction,
        }
    }
}

#[derive(Default)]
pub struct LoadOptions {
    pub on_progress: Option<Box<dyn Fn(LoadProgress) + Send + Sync>>,
}

/// Download, parse, reorder and assign one registry entry into `target`.
pub async fn load_entry<T: ModelTarget + ?Sized>(
    entry: &ModelEntry,
    scope: &Scope,
    cache: &ArchiveCache,
    target: &mut T,
    options: &LoadOptions,
) -> Result<usize> {
    let progress = |p: LoadProgress| {
        if let Some(ref cb) = options.on_progress {
            cb(p);
        }
    };

    progress(LoadProgress::new(LoadPhase::Download, 0, 0));
    let on_bytes = |loaded: u64, total: Option<u64>| {
        progress(LoadProgress::new(LoadPhase::Download, loaded, total.unwrap_or(0)));
    };
    let path = cache.materialize_with(&entry.descriptor, &on_bytes).await?;

    progress(LoadProgress::new(LoadPhase::Parse, 0, 1));
    let format = entry.format;
    let groups = tokio::task::spawn_blocking(move || format.parse(&path)).await??;
    debug!("{}: parsed {} groups", entry.descriptor.filename, groups.len());
    progress(LoadProgress::new(LoadPhase::Parse, 1, 1));

    let groups = rules::apply(groups, &entry.rules)?;
    let weights = flatten(groups);
    let total = weights.len() as u64;

    progress(LoadProgress::new(LoadPhase::Assign, 0, total));
    let assigned = assign_weights(target, scope, weights)?;
    progress(LoadProgress::new(LoadPhase::Assign, total, total));

    info!(
        "{scope}: loaded {assigned} weights from {} ({})",
        entry.descriptor.filename, entry.origin
    );
    Ok(assigned)
}

#[derive(Debug)]
pub enum ScopeStatus {
    Loaded {
        model: String,
        kind: MatchKind,
        weights: usize,
    },
    /// No registry entry matched; the target was asked to initialize itself.
    NotFound,
    Failed(ZooError),
}

#[derive(Debug)]
pub struct ScopeOutcome {
    pub scope: Scope,
    pub status: ScopeStatus,
}

/// Per-scope results of a batched load, in request order.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub outcomes: Vec<ScopeOutcome>,
}

impl LoadReport {
    pub fn all_loaded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, ScopeStatus::Loaded { .. }))
    }

    pub fn not_found(&self) -> impl Iterator<Item = &Scope> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ScopeStatus::NotFound))
            .map(|o| &o.scope)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Scope, &ZooError)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            ScopeStatus::Failed(e) => Some((&o.scope, e)),
            _ => None,
        })
    }

    /// The first failure, if any. Unmatched scopes are not failures.
    pub fn into_result(self) -> Result<Self> {
        if self.failures().next().is_none() {
            return Ok(self);
        }
        Err(self
            .outcomes
            .into_iter()
            .find_map(|o| match o.status {
                ScopeStatus::Failed(e) => Some(e),
                _ => None,
            })
            .unwrap_or_else(|| ZooError::Other("load failed".into())))
    }
}
