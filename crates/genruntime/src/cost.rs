//! Pricing-table lookup and the per-execution cost ledger.

use gencore::{CostBreakdown, CostError, CostSummary, WorkflowNode};
use std::collections::HashMap;

/// Inputs to a pricing lookup, extracted from a node's configuration
/// payload.
#[derive(Debug, Clone)]
pub struct PricingParams {
    pub node_type: String,
    pub model: String,
    pub resolution: Option<String>,
    pub duration_seconds: Option<f64>,
    pub with_audio: bool,
}

impl PricingParams {
    pub fn from_node(node: &WorkflowNode) -> Self {
        Self {
            node_type: node.node_type.clone(),
            model: node.data_str("model").unwrap_or_default().to_string(),
            resolution: node.data_str("resolution").map(str::to_string),
            duration_seconds: node.data_f64("duration"),
            with_audio: node.data_bool("with_audio").unwrap_or(false),
        }
    }
}

/// Price rule for one (node type, model) combination.
#[derive(Debug, Clone)]
pub struct PriceRule {
    /// Flat cost per generation.
    pub base: f64,
    /// Additional cost per second of generated media.
    pub per_second: f64,
    /// Multipliers per resolution label; a requested resolution missing
    /// from this map is an unpriced combination.
    pub resolution_multipliers: HashMap<String, f64>,
    /// Flat surcharge when audio generation is requested.
    pub audio_surcharge: f64,
}

impl PriceRule {
    pub fn flat(base: f64) -> Self {
        Self {
            base,
            per_second: 0.0,
            resolution_multipliers: HashMap::new(),
            audio_surcharge: 0.0,
        }
    }

    pub fn per_second(base: f64, per_second: f64) -> Self {
        Self {
            per_second,
            ..Self::flat(base)
        }
    }

    pub fn with_resolutions(mut self, multipliers: &[(&str, f64)]) -> Self {
        self.resolution_multipliers = multipliers
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        self
    }

    pub fn with_audio_surcharge(mut self, surcharge: f64) -> Self {
        self.audio_surcharge = surcharge;
        self
    }
}

/// Pure pricing-table lookup; unknown combinations fail with
/// `UnpricedNode`.
pub struct PricingTable {
    rules: HashMap<(String, String), PriceRule>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Catalog for the built-in strategies and the models they expose.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.insert("image.generate", "flux-schnell", PriceRule::flat(0.003));
        table.insert("image.generate", "flux-dev", PriceRule::flat(0.025));
        table.insert("image.generate", "flux-pro", PriceRule::flat(0.055));
        table.insert("image.generate", "sdxl", PriceRule::flat(0.009));
        table.insert(
            "video.generate",
            "veo-3",
            PriceRule::per_second(0.0, 0.40)
                .with_resolutions(&[("720p", 1.0), ("1080p", 1.5)])
                .with_audio_surcharge(0.15),
        );
        table.insert(
            "video.generate",
            "kling-v2",
            PriceRule::per_second(0.0, 0.28).with_resolutions(&[("720p", 1.0), ("1080p", 1.4)]),
        );
        table.insert("text.generate", "llama-3-70b", PriceRule::flat(0.0016));
        table.insert("text.generate", "claude-sonnet", PriceRule::flat(0.009));
        table
    }

    pub fn insert(&mut self, node_type: &str, model: &str, rule: PriceRule) {
        self.rules
            .insert((node_type.to_string(), model.to_string()), rule);
    }

    pub fn price(&self, params: &PricingParams) -> Result<CostBreakdown, CostError> {
        let rule = self
            .rules
            .get(&(params.node_type.clone(), params.model.clone()))
            .ok_or_else(|| CostError::UnpricedNode {
                node_type: params.node_type.clone(),
                model: params.model.clone(),
            })?;

        let multiplier = match &params.resolution {
            Some(resolution) => *rule.resolution_multipliers.get(resolution).ok_or_else(|| {
                CostError::UnpricedNode {
                    node_type: params.node_type.clone(),
                    model: format!("{}@{}", params.model, resolution),
                }
            })?,
            None => 1.0,
        };

        let duration = params.duration_seconds.unwrap_or(0.0);
        let audio_surcharge = if params.with_audio {
            rule.audio_surcharge
        } else {
            0.0
        };
        let total = (rule.base + rule.per_second * duration) * multiplier + audio_surcharge;

        Ok(CostBreakdown {
            model: params.model.clone(),
            base: rule.base,
            duration_seconds: params.duration_seconds,
            resolution: params.resolution.clone(),
            audio_surcharge,
            total,
        })
    }
}

/// Maintains the execution-level cost summary as jobs settle.
pub struct CostAccumulator {
    table: PricingTable,
}

impl CostAccumulator {
    pub fn new(table: PricingTable) -> Self {
        Self { table }
    }

    pub fn price_job(&self, params: &PricingParams) -> Result<CostBreakdown, CostError> {
        self.table.price(params)
    }

    /// Fold one priced job into the running summary (incremental add).
    pub fn apply(&self, summary: &mut CostSummary, node_id: &str, breakdown: &CostBreakdown) {
        summary.add(node_id, breakdown.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(node_type: &str, model: &str) -> PricingParams {
        PricingParams {
            node_type: node_type.to_string(),
            model: model.to_string(),
            resolution: None,
            duration_seconds: None,
            with_audio: false,
        }
    }

    #[test]
    fn flat_image_price() {
        let table = PricingTable::standard();
        let breakdown = table.price(&params("image.generate", "flux-dev")).unwrap();
        assert!((breakdown.total - 0.025).abs() < 1e-9);
    }

    #[test]
    fn video_price_scales_with_duration_resolution_and_audio() {
        let table = PricingTable::standard();
        let mut p = params("video.generate", "veo-3");
        p.duration_seconds = Some(8.0);
        p.resolution = Some("1080p".to_string());
        p.with_audio = true;

        let breakdown = table.price(&p).unwrap();
        // 0.40/s * 8s * 1.5 + 0.15 audio
        assert!((breakdown.total - (0.40 * 8.0 * 1.5 + 0.15)).abs() < 1e-9);
        assert!((breakdown.audio_surcharge - 0.15).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_unpriced() {
        let table = PricingTable::standard();
        let err = table.price(&params("image.generate", "dall-e-9")).unwrap_err();
        assert!(matches!(err, CostError::UnpricedNode { .. }));
    }

    #[test]
    fn unknown_resolution_is_unpriced() {
        let table = PricingTable::standard();
        let mut p = params("video.generate", "veo-3");
        p.duration_seconds = Some(4.0);
        p.resolution = Some("8k".to_string());

        assert!(matches!(
            table.price(&p),
            Err(CostError::UnpricedNode { .. })
        ));
    }

    #[test]
    fn accumulator_folds_into_summary() {
        let accumulator = CostAccumulator::new(PricingTable::standard());
        let mut summary = gencore::CostSummary::default();

        let b = accumulator
            .price_job(&params("image.generate", "flux-schnell"))
            .unwrap();
        accumulator.apply(&mut summary, "b", &b);
        accumulator.apply(&mut summary, "c", &b);

        assert!((summary.total - 0.006).abs() < 1e-9);
        assert_eq!(summary.per_node.len(), 2);
    }
}
