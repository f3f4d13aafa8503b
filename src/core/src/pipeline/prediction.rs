use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::configuration::types::ImagesConfig;
use crate::error_handling::types::PipelineError;
use crate::pipeline::detector::Detector;
use crate::pipeline::image_store::{relative_key, ImageStore};
use crate::storage::storage_trait::Storage;
use crate::storage::types::DetectionObject;

/// Where the pipeline keeps its local copies and where it publishes results.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    pub original_dir: PathBuf,
    pub predicted_dir: PathBuf,
    pub published_prefix: String,
}

impl ImageLayout {
    pub fn from_config(images: &ImagesConfig) -> Self {
        Self {
            original_dir: images.upload_dir.join("original"),
            predicted_dir: images.upload_dir.join("predicted"),
            published_prefix: images.published_prefix.clone(),
        }
    }

    /// Key of the annotated image in the object store, named after the source object.
    pub fn published_key(&self, image_key: &str) -> String {
        format!("{}/{}", self.published_prefix, basename(image_key))
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub prediction_uid: String,
    pub detection_count: usize,
    pub labels: Vec<String>,
    #[serde(skip)]
    pub published_key: String,
}

pub(crate) fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn local_name(uid: &str, image_key: &str) -> String {
    match Path::new(basename(image_key)).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", uid, ext),
        None => uid.to_string(),
    }
}

pub struct PredictionPipeline {
    storage: Arc<dyn Storage>,
    detector: Arc<dyn Detector>,
    images: Arc<dyn ImageStore>,
    layout: ImageLayout,
}

impl PredictionPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        detector: Arc<dyn Detector>,
        images: Arc<dyn ImageStore>,
        layout: ImageLayout,
    ) -> Result<Self, PipelineError> {
        for dir in [&layout.original_dir, &layout.predicted_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create {}: {}", dir.display(), e);
                PipelineError::ImageTransfer(format!("{}: {}", dir.display(), e))
            })?;
        }
        Ok(Self {
            storage,
            detector,
            images,
            layout,
        })
    }

    /// Fetches `image_key`, runs detection, persists the session with its
    /// detections and publishes the annotated image.
    ///
    /// Nothing is persisted when the fetch or the detection fails.
    pub fn run(&self, image_key: &str) -> Result<PredictionSummary, PipelineError> {
        relative_key(image_key)?;
        let uid = Uuid::new_v4().to_string();
        let file_name = local_name(&uid, image_key);
        let original_path = self.layout.original_dir.join(&file_name);
        let predicted_path = self.layout.predicted_dir.join(&file_name);

        self.images.download(image_key, &original_path)?;
        let found = self.detector.detect(&original_path, &predicted_path)?;

        let detections: Vec<DetectionObject> = found
            .into_iter()
            .enumerate()
            .map(|(index, d)| DetectionObject {
                prediction_uid: uid.clone(),
                sequence_index: index as u32,
                label: d.label,
                score: d.score,
                bbox: d.bbox,
            })
            .collect();

        self.storage.persist_prediction(
            &uid,
            &original_path.to_string_lossy(),
            &predicted_path.to_string_lossy(),
            &detections,
        )?;

        let published_key = self.layout.published_key(image_key);
        self.images.upload(&predicted_path, &published_key)?;

        info!(
            "Prediction {} for {}: {} detection(s)",
            uid,
            image_key,
            detections.len()
        );
        Ok(PredictionSummary {
            prediction_uid: uid,
            detection_count: detections.len(),
            labels: detections.into_iter().map(|d| d.label).collect(),
            published_key,
        })
    }
}
