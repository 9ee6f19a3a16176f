use async_trait::async_trait;
use gencore::{
    GenerationProvider, PredictionId, PredictionRequest, PredictionState, PredictionUpdate,
    ProviderError,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

struct MockPrediction {
    request: PredictionRequest,
    // Remaining states to report; the final one repeats forever.
    steps: VecDeque<PredictionState>,
    state: PredictionState,
}

#[derive(Default)]
struct MockState {
    counter: u64,
    script: Vec<PredictionState>,
    create_failures: VecDeque<ProviderError>,
    predictions: HashMap<PredictionId, MockPrediction>,
    cancelled: Vec<PredictionId>,
}

/// Scriptable in-memory provider.
///
/// Each created prediction walks a configured state script, one step per
/// `get_prediction` call, and ids are assigned sequentially ("p1", "p2",
/// ...). Create-time failures can be queued to exercise retry paths.
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    /// Default script: one `processing` report, then `succeeded`.
    pub fn new() -> Self {
        Self::with_script(vec![PredictionState::Processing, PredictionState::Succeeded])
    }

    pub fn with_script(script: Vec<PredictionState>) -> Self {
        Self {
            state: Mutex::new(MockState {
                script,
                ..MockState::default()
            }),
        }
    }

    /// Queue errors returned by the next `create_prediction` calls before
    /// creations succeed again.
    pub fn fail_next_creates(&self, count: usize, error: ProviderError) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..count {
            state.create_failures.push_back(error.clone());
        }
    }

    /// Requests accepted so far, in creation order.
    pub fn created(&self) -> Vec<PredictionRequest> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<&PredictionId> = state.predictions.keys().collect();
        ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        ids.iter()
            .map(|id| state.predictions[*id].request.clone())
            .collect()
    }

    pub fn cancelled(&self) -> Vec<PredictionId> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.cancelled.clone()
    }

    fn output_for(request: &PredictionRequest, id: &str) -> serde_json::Value {
        json!({
            "url": format!("https://mock.provider/outputs/{id}"),
            "model": request.model,
        })
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn create_prediction(
        &self,
        request: PredictionRequest,
    ) -> Result<PredictionId, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }
        state.counter += 1;
        let id = format!("p{}", state.counter);
        let mut steps: VecDeque<PredictionState> = state.script.iter().copied().collect();
        let first = steps.pop_front().unwrap_or(PredictionState::Succeeded);
        state.predictions.insert(
            id.clone(),
            MockPrediction {
                request,
                steps,
                state: first,
            },
        );
        Ok(id)
    }

    async fn get_prediction(&self, id: &str) -> Result<PredictionUpdate, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(prediction) = state.predictions.get_mut(id) else {
            return Err(ProviderError::Permanent(format!("unknown prediction {id}")));
        };

        let current = prediction.state;
        if let Some(next) = prediction.steps.pop_front() {
            prediction.state = next;
        }

        let (output, error) = match current {
            PredictionState::Succeeded => {
                (Some(Self::output_for(&prediction.request, id)), None)
            }
            PredictionState::Failed => (None, Some("mock generation failed".to_string())),
            _ => (None, None),
        };
        Ok(PredictionUpdate {
            id: id.to_string(),
            state: current,
            output,
            error,
            metrics: None,
            progress: None,
        })
    }

    async fn cancel_prediction(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prediction) = state.predictions.get_mut(id) {
            prediction.state = PredictionState::Canceled;
            prediction.steps.clear();
        }
        state.cancelled.push(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walks_script_and_repeats_terminal_state() {
        let provider = MockProvider::new();
        let id = provider
            .create_prediction(PredictionRequest {
                model: "flux-dev".to_string(),
                input: json!({ "prompt": "x" }),
            })
            .await
            .unwrap();
        assert_eq!(id, "p1");

        let first = provider.get_prediction(&id).await.unwrap();
        assert_eq!(first.state, PredictionState::Processing);

        let second = provider.get_prediction(&id).await.unwrap();
        assert_eq!(second.state, PredictionState::Succeeded);
        assert!(second.output.is_some());

        let third = provider.get_prediction(&id).await.unwrap();
        assert_eq!(third.state, PredictionState::Succeeded);
    }

    #[tokio::test]
    async fn queued_create_failures_surface_in_order() {
        let provider = MockProvider::new();
        provider.fail_next_creates(1, ProviderError::Transient("overloaded".to_string()));

        let request = PredictionRequest {
            model: "flux-dev".to_string(),
            input: json!({}),
        };
        let err = provider.create_prediction(request.clone()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.create_prediction(request).await.unwrap(), "p1");
    }
}
