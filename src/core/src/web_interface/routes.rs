use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use log::{debug, error, warn};
use regex::Regex;
use serde::Serialize;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, HealthResponse, PredictQuery};
use crate::error_handling::types::{PipelineError, StorageError};
use crate::pipeline::prediction::PredictionPipeline;
use crate::storage::storage_trait::Storage;

pub type Response = reply::Response;

fn json_response<T: Serialize>(body: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(body), status).into_response()
}

fn api_error(message: impl Into<String>, status: StatusCode) -> Response {
    json_response(&ApiError { message: message.into() }, status)
}

fn storage_error_response(err: &StorageError) -> Response {
    match err {
        StorageError::NotFound(_) => api_error("Prediction not found", StatusCode::NOT_FOUND),
        other => {
            error!("Storage request failed: {}", other);
            api_error("Storage error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Runs a storage call on the blocking pool; the backends block on their own I/O.
async fn blocking<T, F>(storage: Arc<dyn Storage>, call: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Storage) -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(storage.as_ref()))
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {}", e)))?
}

fn with_storage(
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (Arc<dyn Storage>,), Error = Infallible> + Clone {
    warp::any().map(move || storage.clone())
}

pub async fn health(storage: Arc<dyn Storage>) -> Response {
    json_response(
        &HealthResponse {
            status: "ok",
            backend: storage.backend_name(),
        },
        StatusCode::OK,
    )
}

pub async fn predict(pipeline: Option<Arc<PredictionPipeline>>, s3_key: String) -> Response {
    let Some(pipeline) = pipeline else {
        return api_error("No detector configured", StatusCode::SERVICE_UNAVAILABLE);
    };
    let outcome = tokio::task::spawn_blocking(move || pipeline.run(&s3_key)).await;
    match outcome {
        Ok(Ok(summary)) => json_response(&summary, StatusCode::OK),
        Ok(Err(PipelineError::InvalidImageKey(key))) => {
            api_error(format!("Invalid image key {}", key), StatusCode::BAD_REQUEST)
        }
        Ok(Err(PipelineError::StorageError(e))) => storage_error_response(&e),
        Ok(Err(e)) => {
            error!("Prediction failed: {}", e);
            api_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => {
            error!("Prediction task failed: {}", e);
            api_error("Prediction failed", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn get_prediction(storage: Arc<dyn Storage>, uid: String) -> Response {
    match blocking(storage, move |s| s.fetch_by_uid(&uid)).await {
        Ok(record) => json_response(&record, StatusCode::OK),
        Err(e) => storage_error_response(&e),
    }
}

/// `label` is the raw path segment, still percent-encoded.
pub async fn predictions_by_label(storage: Arc<dyn Storage>, label: String) -> Response {
    let label = match urlencoding::decode(&label) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => return api_error("Label is not valid UTF-8", StatusCode::BAD_REQUEST),
    };
    match blocking(storage, move |s| s.query_by_label(&label)).await {
        Ok(matches) => json_response(&matches, StatusCode::OK),
        Err(e) => storage_error_response(&e),
    }
}

pub async fn predictions_by_score(storage: Arc<dyn Storage>, min_score: f64) -> Response {
    if !(0.0..=1.0).contains(&min_score) {
        return api_error(
            "min_score must be between 0 and 1",
            StatusCode::BAD_REQUEST,
        );
    }
    match blocking(storage, move |s| s.query_by_score(min_score)).await {
        Ok(matches) => json_response(&matches, StatusCode::OK),
        Err(e) => storage_error_response(&e),
    }
}

/// Picks the image type the client asked for; substring match on `Accept`.
fn negotiate_image_type(accept: &str) -> Option<&'static str> {
    if accept.contains("image/png") {
        Some("image/png")
    } else if accept.contains("image/jpeg") || accept.contains("image/jpg") {
        Some("image/jpeg")
    } else {
        None
    }
}

pub async fn prediction_image(
    storage: Arc<dyn Storage>,
    uid: String,
    accept: Option<String>,
) -> Response {
    let path = match blocking(storage, move |s| s.resolve_image_path(&uid)).await {
        Ok(path) => path,
        Err(e) => return storage_error_response(&e),
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Predicted image {} unreadable: {}", path, e);
            return api_error("Predicted image file not found", StatusCode::NOT_FOUND);
        }
    };
    match negotiate_image_type(accept.as_deref().unwrap_or("")) {
        Some(mime) => reply::with_header(bytes, "Content-Type", mime).into_response(),
        None => api_error(
            "Client does not accept an image format",
            StatusCode::NOT_ACCEPTABLE,
        ),
    }
}

fn safe_file_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

pub async fn image_file(upload_dir: PathBuf, kind: String, filename: String) -> Response {
    if kind != "original" && kind != "predicted" {
        return api_error("Invalid image type", StatusCode::BAD_REQUEST);
    }
    if !safe_file_name(&filename) {
        return api_error("Invalid file name", StatusCode::BAD_REQUEST);
    }
    let path = upload_dir.join(&kind).join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            debug!("Serving {} as {}", path.display(), mime);
            reply::with_header(bytes, "Content-Type", mime.to_string()).into_response()
        }
        Err(_) => api_error("Image not found", StatusCode::NOT_FOUND),
    }
}

/// GET /health
pub fn health_route(
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_storage(storage))
        .then(health)
}

/// POST /predict?s3_key=...
pub fn predict_route(
    pipeline: Option<Arc<PredictionPipeline>>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("predict")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::query::<PredictQuery>())
        .then(move |query: PredictQuery| predict(pipeline.clone(), query.s3_key))
}

/// GET /prediction/:uid
pub fn get_prediction_route(
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("prediction" / String)
        .and(warp::get())
        .and(with_storage(storage))
        .then(|uid, storage| get_prediction(storage, uid))
}

/// GET /prediction/:uid/image
pub fn prediction_image_route(
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("prediction" / String / "image")
        .and(warp::get())
        .and(warp::header::optional::<String>("accept"))
        .and(with_storage(storage))
        .then(|uid, accept, storage| prediction_image(storage, uid, accept))
}

/// GET /predictions/label/:label
pub fn label_route(
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("predictions" / "label" / String)
        .and(warp::get())
        .and(with_storage(storage))
        .then(|label, storage| predictions_by_label(storage, label))
}

/// GET /predictions/score/:min_score
pub fn score_route(
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("predictions" / "score" / f64)
        .and(warp::get())
        .and(with_storage(storage))
        .then(|min_score, storage| predictions_by_score(storage, min_score))
}

/// GET /image/:type/:filename
pub fn image_file_route(
    upload_dir: PathBuf,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("image" / String / String)
        .and(warp::get())
        .then(move |kind, filename| image_file(upload_dir.clone(), kind, filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::prediction::tests::{
        cat_and_dog, memory_storage, scratch_pipeline, FixedDetector,
    };
    use crate::storage::types::{BoundingBox, DetectionObject};
    use tempfile::TempDir;

    fn seeded(dir: &TempDir) -> Arc<dyn Storage> {
        let storage = memory_storage();
        let image = dir.path().join("p1.png");
        std::fs::write(&image, b"png").unwrap();
        storage
            .persist_prediction(
                "s1",
                "o1.png",
                &image.to_string_lossy(),
                &[DetectionObject {
                    prediction_uid: "s1".into(),
                    sequence_index: 0,
                    label: "traffic light".into(),
                    score: 0.8,
                    bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                }],
            )
            .unwrap();
        storage
            .persist_session("s2", "o2.png", &dir.path().join("gone.png").to_string_lossy())
            .unwrap();
        storage
    }

    #[test]
    fn test_negotiate_image_type() {
        assert_eq!(negotiate_image_type("image/png,*/*"), Some("image/png"));
        assert_eq!(negotiate_image_type("image/jpg"), Some("image/jpeg"));
        assert_eq!(negotiate_image_type("text/html"), None);
        assert_eq!(negotiate_image_type(""), None);
    }

    #[test]
    fn test_safe_file_name() {
        assert!(safe_file_name("abc-1.jpg"));
        assert!(!safe_file_name(".."));
        assert!(!safe_file_name(".hidden"));
        assert!(!safe_file_name("a/b.jpg"));
    }

    #[tokio::test]
    async fn test_health() {
        let res = health(memory_storage()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_prediction() {
        let dir = TempDir::new().unwrap();
        let storage = seeded(&dir);
        assert_eq!(get_prediction(storage.clone(), "s1".into()).await.status(), StatusCode::OK);
        assert_eq!(
            get_prediction(storage, "nope".into()).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_label_query_decodes_and_allows_empty() {
        let dir = TempDir::new().unwrap();
        let storage = seeded(&dir);
        assert_eq!(
            predictions_by_label(storage.clone(), "traffic%20light".into()).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            predictions_by_label(storage, "zebra".into()).await.status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_score_range() {
        let storage = memory_storage();
        assert_eq!(predictions_by_score(storage.clone(), 0.5).await.status(), StatusCode::OK);
        assert_eq!(predictions_by_score(storage.clone(), 1.0).await.status(), StatusCode::OK);
        assert_eq!(
            predictions_by_score(storage.clone(), 1.5).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            predictions_by_score(storage, f64::NAN).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_prediction_image() {
        let dir = TempDir::new().unwrap();
        let storage = seeded(&dir);
        let ok = prediction_image(storage.clone(), "s1".into(), Some("image/png".into())).await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["content-type"], "image/png");

        let refused = prediction_image(storage.clone(), "s1".into(), None).await;
        assert_eq!(refused.status(), StatusCode::NOT_ACCEPTABLE);

        let no_file = prediction_image(storage.clone(), "s2".into(), Some("image/png".into())).await;
        assert_eq!(no_file.status(), StatusCode::NOT_FOUND);

        let no_session = prediction_image(storage, "s9".into(), Some("image/png".into())).await;
        assert_eq!(no_session.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_image_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("original")).unwrap();
        std::fs::write(dir.path().join("original").join("a.jpg"), b"jpg").unwrap();
        let root = dir.path().to_path_buf();

        let ok = image_file(root.clone(), "original".into(), "a.jpg".into()).await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()["content-type"], "image/jpeg");
        assert_eq!(
            image_file(root.clone(), "thumbs".into(), "a.jpg".into()).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            image_file(root, "predicted".into(), "a.jpg".into()).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_predict() {
        assert_eq!(
            predict(None, "in/cat.jpg".into()).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let dir = TempDir::new().unwrap();
        let (pipeline, _) =
            scratch_pipeline(&dir, memory_storage(), Arc::new(FixedDetector(cat_and_dog())));
        let pipeline = Some(Arc::new(pipeline));
        assert_eq!(
            predict(pipeline.clone(), "in/cat.jpg".into()).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            predict(pipeline.clone(), "../x.jpg".into()).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            predict(pipeline, "in/missing.jpg".into()).await.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
