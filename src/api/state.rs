use std::sync::Arc;

use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::jobs::JobQueues;
use crate::observability::Metrics;
use crate::sources::SourceContext;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queues: Arc<JobQueues>,
    pub artifacts: ArtifactStore,
    pub sources_ctx: Arc<SourceContext>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, queues: JobQueues, artifacts: ArtifactStore) -> Self {
        let sources_ctx = Arc::new(SourceContext::from_config(&config));
        Self {
            config: Arc::new(config),
            queues: Arc::new(queues),
            artifacts,
            sources_ctx,
            metrics: Arc::new(Metrics::new()),
        }
    }
}
