use thiserror::Error;

/// Failures while loading or serialising a scenario document.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid scenario json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid scenario yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("scenario document is empty")]
    Empty,
}
