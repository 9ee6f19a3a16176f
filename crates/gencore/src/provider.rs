use crate::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Provider-assigned identifier for one asynchronous unit of work.
pub type PredictionId = String;

/// Contract with the asynchronous generation provider.
///
/// The provider accepts a prediction, runs it out of band, and reports
/// status through polling (`get_prediction`) and/or webhooks. Cancellation
/// is best-effort; providers that do not support it may return `Ok(())`
/// without effect.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn create_prediction(
        &self,
        request: PredictionRequest,
    ) -> Result<PredictionId, ProviderError>;

    async fn get_prediction(&self, id: &str) -> Result<PredictionUpdate, ProviderError>;

    async fn cancel_prediction(&self, id: &str) -> Result<(), ProviderError>;
}

/// Request payload for `create_prediction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub model: String,
    pub input: serde_json::Value,
}

/// Provider-side lifecycle of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionState {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// One status report for a prediction, from either the poll path or a
/// webhook delivery. Both feed the same merge path in the poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionUpdate {
    pub id: PredictionId,
    pub state: PredictionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PredictionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time_seconds: Option<f64>,
}
