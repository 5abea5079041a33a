//! Model pricing and cost computation.
//!
//! Rates are USD per million tokens. Lookup for a canonical model tag goes
//! exact match, then family keyword, then the default tier. Costs are always
//! computed per model and summed afterwards; pricing a pre-summed
//! multi-model total would bill every token at one model's rate.

use crate::error::Result;
use crate::models::TokenCounts;
use crate::normalize::{DEFAULT_FAMILIES, Normalizer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Per-million-token rates for one model or tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

impl ModelPricing {
    /// Rates with Anthropic's usual cache multipliers: writes at 1.25x input,
    /// reads at 0.1x input.
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cache_read_per_million: input * 0.1,
            cache_write_per_million: input * 1.25,
        }
    }

    pub fn with_cache(mut self, read: f64, write: f64) -> Self {
        self.cache_read_per_million = read;
        self.cache_write_per_million = write;
        self
    }

    /// Calculate cost from token counts.
    pub fn cost(&self, tokens: &TokenCounts) -> f64 {
        (tokens.input as f64 / 1_000_000.0) * self.input_per_million
            + (tokens.output as f64 / 1_000_000.0) * self.output_per_million
            + (tokens.cache_read as f64 / 1_000_000.0) * self.cache_read_per_million
            + (tokens.cache_creation as f64 / 1_000_000.0) * self.cache_write_per_million
    }
}

/// Rates applied to every model whose tag contains `family`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyPricing {
    pub family: String,
    pub pricing: ModelPricing,
}

/// Complete pricing table handed to a [`CostModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Exact canonical tags (e.g. "opus-4-6")
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,

    /// Family fallbacks, checked in order
    #[serde(default)]
    pub families: Vec<FamilyPricing>,

    /// Used when nothing else matches, including records without a model
    pub default: ModelPricing,
}

/// Optional overrides read from `pricing.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct PricingOverrides {
    #[serde(default)]
    models: HashMap<String, ModelPricing>,
    #[serde(default)]
    families: Vec<FamilyPricing>,
    #[serde(default)]
    default: Option<ModelPricing>,
}

impl PricingConfig {
    /// A table with only a default tier.
    pub fn flat(default: ModelPricing) -> Self {
        Self {
            models: HashMap::new(),
            families: Vec::new(),
            default,
        }
    }

    /// Built-in table merged with the overrides file at `path`, if it exists.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if !path.exists() {
            debug!(path = %path.display(), "No pricing overrides");
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;
        config.apply_yaml(&contents)?;
        info!(path = %path.display(), "Loaded pricing overrides");
        Ok(config)
    }

    /// Merge YAML overrides into this table.
    ///
    /// Exact models are added or replaced; a family already in the table
    /// keeps its priority slot, new families go last.
    pub fn apply_yaml(&mut self, yaml: &str) -> Result<()> {
        if yaml.trim().is_empty() {
            return Ok(());
        }
        let overrides: PricingOverrides = serde_yaml::from_str(yaml)?;

        self.models.extend(overrides.models);
        for entry in overrides.families {
            let family = entry.family.to_lowercase();
            match self.families.iter_mut().find(|f| f.family == family) {
                Some(existing) => existing.pricing = entry.pricing,
                None => self.families.push(FamilyPricing {
                    family,
                    pricing: entry.pricing,
                }),
            }
        }
        if let Some(default) = overrides.default {
            self.default = default;
        }
        Ok(())
    }

    /// Family keywords in lookup order.
    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(|f| f.family.as_str())
    }
}

impl Default for PricingConfig {
    /// Published Anthropic list prices.
    fn default() -> Self {
        let opus_legacy = ModelPricing::new(15.0, 75.0).with_cache(1.50, 18.75);
        let opus = ModelPricing::new(5.0, 25.0).with_cache(0.50, 6.25);
        let sonnet = ModelPricing::new(3.0, 15.0).with_cache(0.30, 3.75);
        let haiku = ModelPricing::new(1.0, 5.0).with_cache(0.10, 1.25);
        let haiku_legacy = ModelPricing::new(0.80, 4.0).with_cache(0.08, 1.0);

        let models = [
            ("opus-4-6", opus),
            ("opus-4-5", opus),
            ("opus-4-1", opus_legacy),
            ("opus-4", opus_legacy),
            ("sonnet-4-5", sonnet),
            ("sonnet-4", sonnet),
            ("haiku-4-5", haiku),
            ("haiku-3-5", haiku_legacy),
        ]
        .into_iter()
        .map(|(name, pricing)| (name.to_string(), pricing))
        .collect();

        // Unversioned family fallbacks bill at the oldest published rate
        let families = DEFAULT_FAMILIES
            .iter()
            .map(|&family| FamilyPricing {
                family: family.to_string(),
                pricing: match family {
                    "opus" => opus_legacy,
                    "haiku" => haiku_legacy,
                    _ => sonnet,
                },
            })
            .collect();

        Self {
            models,
            families,
            default: sonnet,
        }
    }
}

/// Prices token usage per model.
#[derive(Debug, Clone)]
pub struct CostModel {
    config: PricingConfig,
    families: Normalizer,
}

impl CostModel {
    pub fn new(config: PricingConfig) -> Self {
        let families = Normalizer::with_families(config.family_names());
        Self { config, families }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Rates for a canonical model tag.
    pub fn price(&self, model: Option<&str>) -> &ModelPricing {
        let Some(model) = model else {
            return &self.config.default;
        };
        if let Some(pricing) = self.config.models.get(model) {
            return pricing;
        }
        self.families
            .family_of(model)
            .and_then(|family| {
                self.config
                    .families
                    .iter()
                    .find(|f| f.family.eq_ignore_ascii_case(family))
            })
            .map(|f| &f.pricing)
            .unwrap_or(&self.config.default)
    }

    /// Cost of one model's usage.
    pub fn cost(&self, model: Option<&str>, tokens: &TokenCounts) -> f64 {
        self.price(model).cost(tokens)
    }

    /// Sum of per-model costs.
    pub fn cost_of<'a, I>(&self, buckets: I) -> f64
    where
        I: IntoIterator<Item = (Option<&'a str>, &'a TokenCounts)>,
    {
        buckets
            .into_iter()
            .map(|(model, tokens)| self.cost(model, tokens))
            .sum()
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn million(kind: &str) -> TokenCounts {
        match kind {
            "input" => TokenCounts::new(1_000_000, 0, 0, 0),
            "output" => TokenCounts::new(0, 1_000_000, 0, 0),
            "read" => TokenCounts::new(0, 0, 1_000_000, 0),
            _ => TokenCounts::new(0, 0, 0, 1_000_000),
        }
    }

    #[test]
    fn test_cost_formula() {
        let pricing = ModelPricing::new(15.0, 75.0).with_cache(1.5, 18.75);
        assert!((pricing.cost(&million("input")) - 15.0).abs() < 1e-9);
        assert!((pricing.cost(&million("output")) - 75.0).abs() < 1e-9);
        assert!((pricing.cost(&million("read")) - 1.5).abs() < 1e-9);
        assert!((pricing.cost(&million("write")) - 18.75).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_order() {
        let model = CostModel::default();
        // exact
        assert_eq!(model.price(Some("opus-4-6")).input_per_million, 5.0);
        // family
        assert_eq!(model.price(Some("opus-3")).input_per_million, 15.0);
        assert_eq!(model.price(Some("haiku")).input_per_million, 0.80);
        // default
        assert_eq!(model.price(Some("gpt-4o")).input_per_million, 3.0);
        assert_eq!(model.price(None).input_per_million, 3.0);
    }

    #[test]
    fn test_default_families_match_normalizer() {
        let config = PricingConfig::default();
        let families: Vec<&str> = config.family_names().collect();
        assert_eq!(families, DEFAULT_FAMILIES);

        // Any tag the normalizer files under a family gets that family's rate
        let normalizer = Normalizer::new();
        let model = CostModel::new(config);
        for raw in ["claude-3-opus-latest", "Claude Haiku", "sonnet-9"] {
            let family = normalizer.family_of(raw).unwrap();
            assert_eq!(
                model.price(Some(raw)),
                &model.config().families.iter().find(|f| f.family == family).unwrap().pricing,
                "{raw}"
            );
        }
    }

    #[test]
    fn test_injected_rates() {
        let mut config = PricingConfig::flat(ModelPricing::new(1.0, 2.0));
        config.families.push(FamilyPricing {
            family: "opus".into(),
            pricing: ModelPricing::new(10.0, 20.0),
        });
        let model = CostModel::new(config);

        assert_eq!(model.cost(Some("opus-9"), &million("input")), 10.0);
        assert_eq!(model.cost(Some("mystery"), &million("input")), 1.0);
    }

    #[test]
    fn test_cost_summed_per_model() {
        let model = CostModel::default();
        let opus = million("input");
        let haiku = million("input");

        let total = model.cost_of([(Some("opus"), &opus), (Some("haiku"), &haiku)]);
        let expected =
            model.price(Some("opus")).input_per_million + model.price(Some("haiku")).input_per_million;
        assert!((total - expected).abs() < 1e-9);
        assert!((total - 2.0 * model.config().default.input_per_million).abs() > 1.0);
    }

    #[test]
    fn test_apply_yaml_overrides() {
        let mut config = PricingConfig::default();
        config
            .apply_yaml(
                r#"
models:
  opus-4-6:
    input_per_million: 6.0
    output_per_million: 30.0
    cache_read_per_million: 0.6
    cache_write_per_million: 7.5
families:
  - family: Sonnet
    pricing:
      input_per_million: 4.0
      output_per_million: 20.0
      cache_read_per_million: 0.4
      cache_write_per_million: 5.0
  - family: glm
    pricing:
      input_per_million: 1.0
      output_per_million: 2.0
      cache_read_per_million: 0.1
      cache_write_per_million: 1.0
"#,
            )
            .unwrap();

        assert_eq!(config.models["opus-4-6"].input_per_million, 6.0);
        let families: Vec<&str> = config.family_names().collect();
        assert_eq!(families, vec!["opus", "sonnet", "haiku", "glm"]);

        let model = CostModel::new(config);
        assert_eq!(model.price(Some("sonnet")).input_per_million, 4.0);
        assert_eq!(model.price(Some("glm-4-7")).output_per_million, 2.0);
        assert_eq!(model.price(None).input_per_million, 3.0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PricingConfig::load(dir.path().join("pricing.yaml")).unwrap();
        assert_eq!(config, PricingConfig::default());
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.yaml");
        std::fs::write(&path, "models: [not, a, map]").unwrap();
        assert!(PricingConfig::load(&path).is_err());
    }
}
