use std::path::Path;
use std::process::Command;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::configuration::types::InferenceConfig;
use crate::error_handling::types::PipelineError;
use crate::storage::types::BoundingBox;

/// One raw model output before it is attached to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f64,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// The detection model, seen as an opaque function from an image to boxes.
///
/// Implementations also write the annotated copy of the image to `annotated`.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &Path, annotated: &Path) -> Result<Vec<Detection>, PipelineError>;
}

/// Runs an external program per image.
///
/// The program gets the source and the annotated output paths as its last
/// two arguments and prints a JSON array of `{label, score, box}` on stdout.
pub struct ProcessDetector {
    command: String,
    args: Vec<String>,
}

impl ProcessDetector {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

impl Detector for ProcessDetector {
    fn detect(&self, image: &Path, annotated: &Path) -> Result<Vec<Detection>, PipelineError> {
        debug!("Running detector {} on {}", self.command, image.display());
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(image)
            .arg(annotated)
            .output()
            .map_err(|e| {
                error!("Failed to start detector {}: {}", self.command, e);
                PipelineError::DetectionFailed(format!("{}: {}", self.command, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Detector exited with {}: {}", output.status, stderr.trim());
            return Err(PipelineError::DetectionFailed(format!(
                "{} exited with {}",
                self.command, output.status
            )));
        }

        let detections: Vec<Detection> = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::DetectionFailed(format!("unreadable detector output: {}", e)))?;
        debug!("Detector found {} object(s)", detections.len());
        Ok(detections)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(script: &str) -> ProcessDetector {
        ProcessDetector::new(&InferenceConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into(), "detector".into()],
        })
    }

    #[test]
    fn test_reads_detections_and_writes_annotation() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("in.jpg");
        let annotated = dir.path().join("out.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        let detector = shell(
            r#"cp "$1" "$2" && echo '[{"label":"cat","score":0.95,"box":[10,20,30,40]}]'"#,
        );
        let found = detector.detect(&image, &annotated).unwrap();
        assert_eq!(
            found,
            vec![Detection {
                label: "cat".into(),
                score: 0.95,
                bbox: BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            }]
        );
        assert!(annotated.exists());
    }

    #[test]
    fn test_failing_program_is_an_error() {
        let dir = TempDir::new().unwrap();
        let detector = shell("echo boom >&2; exit 3");
        let err = detector
            .detect(&dir.path().join("a.jpg"), &dir.path().join("b.jpg"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DetectionFailed(_)));
    }

    #[test]
    fn test_garbage_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let detector = shell("echo not-json");
        assert!(detector
            .detect(&dir.path().join("a.jpg"), &dir.path().join("b.jpg"))
            .is_err());
    }
}
