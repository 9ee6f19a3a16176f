use async_trait::async_trait;
use gencore::{
    GenerationProvider, PredictionId, PredictionMetrics, PredictionRequest, PredictionState,
    PredictionUpdate, ProviderError,
};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub token: String,
}

/// Client for a Replicate-style asynchronous prediction API:
/// `POST /v1/predictions`, `GET /v1/predictions/{id}`,
/// `POST /v1/predictions/{id}/cancel`.
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

#[derive(Debug, Deserialize)]
struct WireMetrics {
    predict_time: Option<f64>,
    total_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WirePrediction {
    id: String,
    status: PredictionState,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    metrics: Option<WireMetrics>,
    #[serde(default)]
    progress: Option<f64>,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/predictions{}", self.config.base_url, path)
    }

    /// HTTP 429 and 5xx are retryable; other client errors are not.
    fn classify(status: reqwest::StatusCode, body: String) -> ProviderError {
        if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::Transient(format!("{status}: {body}"))
        } else {
            ProviderError::Permanent(format!("{status}: {body}"))
        }
    }

    async fn parse_prediction(
        response: reqwest::Response,
    ) -> Result<WirePrediction, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        response
            .json::<WirePrediction>()
            .await
            .map_err(|e| ProviderError::Permanent(format!("malformed prediction body: {e}")))
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn create_prediction(
        &self,
        request: PredictionRequest,
    ) -> Result<PredictionId, ProviderError> {
        let response = self
            .client
            .post(self.url(""))
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        let prediction = Self::parse_prediction(response).await?;
        tracing::debug!(prediction_id = %prediction.id, "Prediction created");
        Ok(prediction.id)
    }

    async fn get_prediction(&self, id: &str) -> Result<PredictionUpdate, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/{id}")))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        let wire = Self::parse_prediction(response).await?;
        Ok(PredictionUpdate {
            id: wire.id,
            state: wire.status,
            output: wire.output,
            error: wire.error,
            metrics: wire.metrics.map(|m| PredictionMetrics {
                predict_time_seconds: m.predict_time,
                total_time_seconds: m.total_time,
            }),
            progress: wire.progress,
        })
    }

    async fn cancel_prediction(&self, id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(self.url(&format!("/{id}/cancel")))
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        Ok(())
    }
}
