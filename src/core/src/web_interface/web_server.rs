use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use warp::{Filter, Rejection, Reply};

use super::routes::*;
use crate::error_handling::types::WebError;
use crate::pipeline::prediction::PredictionPipeline;
use crate::storage::storage_trait::Storage;

/// HTTP API over the prediction history, plus on-demand predictions
pub struct WebServer {
    storage: Arc<dyn Storage>,
    pipeline: Option<Arc<PredictionPipeline>>,
    upload_dir: PathBuf,
}

impl WebServer {
    pub fn new(
        storage: Arc<dyn Storage>,
        pipeline: Option<Arc<PredictionPipeline>>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            storage,
            pipeline,
            upload_dir,
        }
    }

    /// Every route of the API composed into one filter
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        health_route(self.storage.clone())
            .or(predict_route(self.pipeline.clone()))
            .or(prediction_image_route(self.storage.clone()))
            .or(get_prediction_route(self.storage.clone()))
            .or(label_route(self.storage.clone()))
            .or(score_route(self.storage.clone()))
            .or(image_file_route(self.upload_dir.clone()))
    }

    /// Serves the API until the process stops
    pub async fn start(&self, bind_address: &str, port: u16) -> Result<(), WebError> {
        let ip: IpAddr = bind_address
            .parse()
            .map_err(|e| WebError::BindFailed(format!("{}: {}", bind_address, e)))?;
        let addr = SocketAddr::new(ip, port);
        info!("Web interface listening on {}", addr);
        warp::serve(self.routes()).run(addr).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::prediction::tests::memory_storage;

    #[tokio::test]
    async fn test_rejects_bad_bind_address() {
        let server = WebServer::new(memory_storage(), None, PathBuf::from("uploads"));
        assert!(matches!(
            server.start("not-an-ip", 8080).await,
            Err(WebError::BindFailed(_))
        ));
    }
}
