//! ControllerBuilder - controller の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に ControllerConfig を検証する
//! - 指定されなかった port は本番用のデフォルトで埋める

use std::sync::Arc;

use super::config::{ConfigError, ControllerConfig};
use super::controller::LifecycleController;
use super::creation::CreationLimiter;
use crate::impls::MetricsReporter;
use crate::ports::{Clock, NameGenerator, Store, SynthesisReporter, SystemClock, UlidNameGenerator};

/// Builds a [`LifecycleController`].
///
/// ```ignore
/// let controller = ControllerBuilder::new(store)
///     .config(ControllerConfig { creation_qps: 2.0 })
///     .reporter(Arc::new(RecordingReporter::new()))
///     .build()?;
/// ```
pub struct ControllerBuilder {
    store: Arc<dyn Store>,
    config: ControllerConfig,
    clock: Option<Arc<dyn Clock>>,
    names: Option<Arc<dyn NameGenerator>>,
    reporter: Option<Arc<dyn SynthesisReporter>>,
    limiter: Option<Arc<CreationLimiter>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid controller config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ControllerBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: ControllerConfig::default(),
            clock: None,
            names: None,
            reporter: None,
            limiter: None,
        }
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn names(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn SynthesisReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Share a limiter between controllers. Takes precedence over
    /// `config.creation_qps`.
    pub fn limiter(mut self, limiter: Arc<CreationLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> Result<LifecycleController, BuildError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let names = self
            .names
            .unwrap_or_else(|| Arc::new(UlidNameGenerator::new(Arc::clone(&clock))));
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(MetricsReporter::new()));
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(CreationLimiter::new(self.config.creation_qps)));

        Ok(LifecycleController::new(
            self.store, clock, names, reporter, limiter,
        ))
    }
}
