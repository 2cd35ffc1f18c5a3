//! OrchestratorBuilder - `Settings` からオーケストレーターを組み立てる
//!
//! Fail-fast: ストレージのルートはすべて `build()` で作るので、設定の誤りは
//! 最初の起動時ではなくサーバー起動時に報告される。
//!
//! ```ignore
//! let orchestrator = OrchestratorBuilder::new(settings).build().await?;
//! let receipt = orchestrator.lifecycle.launch(request).await?;
//! ```

use std::sync::Arc;

use tracing::info;

use super::broadcaster::LogBroadcaster;
use super::config::ConfigSynthesizer;
use super::lifecycle::{LifecycleDeps, TaskLifecycleManager};
use super::paths::{PathResolver, StorageRoots};
use super::supervisor::ProcessSupervisor;
use crate::domain::OrchestratorError;
use crate::impls::JsonFileTaskStore;
use crate::ports::{Clock, EventSink, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::settings::Settings;

pub struct OrchestratorBuilder {
    settings: Settings,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// 長生きするサービス群。clone は安価。
#[derive(Clone)]
pub struct Orchestrator {
    pub lifecycle: Arc<TaskLifecycleManager>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub settings: Arc<Settings>,
}

impl OrchestratorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            store: None,
            clock: None,
            ids: None,
        }
    }

    /// JSON ファイルの store を差し替える（既定は `<meta root>/*.json`）
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub async fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let settings = self.settings;
        let roots = settings.storage_roots();
        create_roots(&roots).await?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileTaskStore::open(&roots.meta).await?),
        };

        let broadcaster = Arc::new(
            LogBroadcaster::new(Arc::clone(&clock), Arc::clone(&ids))
                .with_outbox_capacity(settings.live.outbox_capacity),
        );
        let sink: Arc<dyn EventSink> = broadcaster.clone();

        let mut supervisor = ProcessSupervisor::new(Arc::clone(&sink), Arc::clone(&clock))
            .with_spawn_grace(settings.spawn_grace());
        if let Some(classifier) = settings.stream_classifier() {
            supervisor = supervisor.with_classifier(classifier);
        }

        let launcher = settings.launcher_spec()?;
        info!(
            script = %launcher.script_path().display(),
            template = %settings.template_path().display(),
            meta = %roots.meta.display(),
            "orchestrator ready"
        );

        let lifecycle = TaskLifecycleManager::new(LifecycleDeps {
            store,
            sink,
            clock,
            ids,
            paths: PathResolver::new(roots),
            config: ConfigSynthesizer::new(settings.template_path()),
            supervisor,
            launcher,
        });

        Ok(Orchestrator {
            lifecycle: Arc::new(lifecycle),
            broadcaster,
            settings: Arc::new(settings),
        })
    }
}

async fn create_roots(roots: &StorageRoots) -> Result<(), OrchestratorError> {
    for dir in [
        &roots.history,
        &roots.data,
        &roots.result,
        &roots.log,
        &roots.config,
        &roots.meta,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| OrchestratorError::io(format!("create {}", dir.display()), e))?;
    }
    Ok(())
}
