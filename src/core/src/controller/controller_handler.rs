use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info};

use crate::configuration::config::Config;
use crate::error_handling::types::*;
use crate::pipeline::detector::ProcessDetector;
use crate::pipeline::image_store::LocalImageStore;
use crate::pipeline::prediction::{ImageLayout, PredictionPipeline};
use crate::queue::poller::{PollSettings, QueuePoller};
use crate::queue::types::{MessageQueue, Notifier};
use crate::storage::factory::open_storage;
use crate::storage::storage_trait::Storage;
use crate::web_interface::web_server::WebServer;

/// Wires storage, the prediction pipeline and the HTTP API together.
pub struct Controller {
    pub config: Config,
    storage: Arc<dyn Storage>,
    pipeline: Option<Arc<PredictionPipeline>>,
    stop: Arc<AtomicBool>,
}

impl Controller {
    /// Opens the configured storage backend and, when a detector is
    /// configured, builds the prediction pipeline.
    ///
    /// Must not be called from inside an async runtime: the storage
    /// backends drive their own.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let storage = open_storage(&config.storage).map_err(|e| {
            error!("Unable to open storage: {}", e);
            ControllerError::StorageError(e)
        })?;

        let pipeline = match &config.inference {
            Some(inference) => {
                let images = LocalImageStore::new(&config.images.object_root)
                    .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
                let pipeline = PredictionPipeline::new(
                    storage.clone(),
                    Arc::new(ProcessDetector::new(inference)),
                    Arc::new(images),
                    ImageLayout::from_config(&config.images),
                )
                .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
                info!("Detector configured: {}", inference.command);
                Some(Arc::new(pipeline))
            }
            None => {
                info!("No detector configured, /predict is disabled");
                None
            }
        };

        Ok(Self {
            config,
            storage,
            pipeline,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn pipeline(&self) -> Option<Arc<PredictionPipeline>> {
        self.pipeline.clone()
    }

    /// Starts a queue worker feeding the pipeline. Returns `None` when no
    /// detector is configured.
    pub fn spawn_queue_poller(
        &self,
        queue: Arc<dyn MessageQueue>,
        notifier: Arc<dyn Notifier>,
        settings: PollSettings,
    ) -> Option<JoinHandle<()>> {
        let pipeline = self.pipeline.clone()?;
        let poller = Arc::new(QueuePoller::new(queue, notifier, pipeline, settings));
        Some(poller.spawn(self.stop.clone()))
    }

    /// Serves the HTTP API until the process stops.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let server = WebServer::new(
            self.storage.clone(),
            self.pipeline.clone(),
            self.config.images.upload_dir.clone(),
        );
        server
            .start(&self.config.server.bind_address, self.config.server.port)
            .await
            .map_err(ControllerError::WebError)
    }

    /// Signals background workers to stop.
    pub fn shutdown(&self) {
        info!("Shutting down");
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}
