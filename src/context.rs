use std::sync::Arc;
use tokio::sync::broadcast;

use crate::adapters::{self, SystemCommander};
use crate::config::AppConfig;
use crate::core::certificate::CertificateAuthority;
use crate::core::health::{HealthClassifier, HealthMonitor};
use crate::core::{Inventory, JobSupervisor, SanitizeEngine};

/// Shared handles threaded through the web layer and background jobs.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub inventory: Arc<Inventory>,
    pub health: Arc<HealthMonitor>,
    pub supervisor: Arc<JobSupervisor>,
    pub engine: Arc<SanitizeEngine>,
    pub certificates: Arc<CertificateAuthority>,
    /// Fan-out for progress frames to every WebSocket subscriber
    pub hub: broadcast::Sender<String>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let commander = adapters::get_commander(config.simulation);
        Self::with_commander(config, commander)
    }

    pub fn with_commander(config: AppConfig, commander: Arc<dyn SystemCommander>) -> Self {
        let classifier = HealthClassifier::load(&config.model_path, &config.feature_map_path);
        let inventory = Arc::new(Inventory::new(commander.clone()));
        let supervisor = Arc::new(JobSupervisor::new());
        let engine = Arc::new(SanitizeEngine::new(
            commander.clone(),
            inventory.clone(),
            supervisor.clone(),
        ));
        let (hub, _) = broadcast::channel(256);

        Self {
            config: Arc::new(config),
            inventory,
            health: Arc::new(HealthMonitor::new(commander, classifier)),
            supervisor,
            engine,
            certificates: Arc::new(CertificateAuthority::from_user_config()),
            hub,
        }
    }
}
