//! Engine configuration. Every threshold, bonus and value set the
//! pipeline uses lives here so historical scenarios can be replayed
//! against overridden values.

use crate::measure::Measure;
use serde::{Deserialize, Serialize};

// ── Gap accounting ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapConfig {
    /// Share of the treatment period that may go uncovered (HEDIS: 20%).
    pub allowance_fraction:  f64,
    /// Applied when a fill's days-supply is missing, zero or negative.
    pub default_days_supply: i64,
    /// Anything above this is rejected as a data-entry error.
    pub max_days_supply:     i64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            allowance_fraction:  0.20,
            default_days_supply: 30,
            max_days_supply:     365,
        }
    }
}

// ── Fragility tiers ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierThresholds {
    pub compliance_threshold: f64,
    /// Fewer completed fills than this → D1a.
    pub min_fills:            usize,
    // Inclusive upper bounds of the delay-budget bands, in days.
    pub f1_max_delay:         f64,
    pub f2_max_delay:         f64,
    pub f3_max_delay:         f64,
    pub f4_max_delay:         f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            compliance_threshold: 0.80,
            min_fills:            2,
            f1_max_delay:         1.0,
            f2_max_delay:         5.0,
            f3_max_delay:         10.0,
            f4_max_delay:         20.0,
        }
    }
}

// ── Priority scoring ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaseScores {
    pub f1: i64,
    pub f2: i64,
    pub f3: i64,
    pub f4: i64,
    pub f5: i64,
}

impl Default for BaseScores {
    fn default() -> Self {
        Self { f1: 100, f2: 80, f3: 60, f4: 40, f5: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BonusValues {
    pub out_of_meds:   i64,
    pub q4:            i64,
    pub multi_measure: i64,
    pub new_patient:   i64,
}

impl Default for BonusValues {
    fn default() -> Self {
        Self { out_of_meds: 30, q4: 25, multi_measure: 15, new_patient: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityConfig {
    pub base_scores:             BaseScores,
    pub bonuses:                 BonusValues,
    pub q4_months:               Vec<u32>,
    pub new_patient_window_days: i64,
    pub multi_measure_min:       usize,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            base_scores:             BaseScores::default(),
            bonuses:                 BonusValues::default(),
            q4_months:               vec![10, 11, 12],
            new_patient_window_days: 90,
            multi_measure_min:       2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueThresholds {
    pub critical: i64,
    pub high:     i64,
    pub watch:    i64,
    pub medium:   i64,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self { critical: 150, high: 100, watch: 80, medium: 60 }
    }
}

// ── Measure value sets ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasureValueSet {
    pub measure:               Measure,
    pub label:                 String,
    #[serde(default)]
    pub rxnorm_codes:          Vec<String>,
    #[serde(default)]
    pub ingredients:           Vec<String>,
    #[serde(default)]
    pub exclusion_ingredients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ValueSetFile {
    measures: Vec<MeasureValueSet>,
}

#[derive(Debug, Clone, Deserialize)]
struct EngineConfigFile {
    #[serde(default)]
    gap:      GapConfig,
    #[serde(default)]
    tiers:    TierThresholds,
    #[serde(default)]
    priority: PriorityConfig,
    #[serde(default)]
    queues:   QueueThresholds,
}

// ── Root ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdherenceConfig {
    pub gap:      GapConfig,
    pub tiers:    TierThresholds,
    pub priority: PriorityConfig,
    pub queues:   QueueThresholds,
    pub measures: Vec<MeasureValueSet>,
}

impl Default for AdherenceConfig {
    fn default() -> Self {
        Self {
            gap:      GapConfig::default(),
            tiers:    TierThresholds::default(),
            priority: PriorityConfig::default(),
            queues:   QueueThresholds::default(),
            measures: default_value_sets(),
        }
    }
}

impl AdherenceConfig {
    /// Load configuration from a data directory laid out as:
    ///   {data_dir}/adherence_config.json
    ///   {data_dir}/value_sets/ma_measures.json
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/adherence_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: EngineConfigFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;

        let vs_path = format!("{data_dir}/value_sets/ma_measures.json");
        let vs_content = std::fs::read_to_string(&vs_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {vs_path}: {e}"))?;
        let vs_file: ValueSetFile = serde_json::from_str(&vs_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {vs_path}: {e}"))?;

        let config = Self {
            gap:      file.gap,
            tiers:    file.tiers,
            priority: file.priority,
            queues:   file.queues,
            measures: vs_file.measures,
        };
        config.validate()?;
        log::debug!(
            "Loaded adherence config from {data_dir}: {} value sets",
            config.measures.len()
        );
        Ok(config)
    }

    /// Reject configurations that would make the tier bands or queue
    /// buckets overlap.
    pub fn validate(&self) -> anyhow::Result<()> {
        let g = &self.gap;
        if !(0.0..=1.0).contains(&g.allowance_fraction) {
            anyhow::bail!("gap.allowance_fraction must be in [0,1], got {}", g.allowance_fraction);
        }
        if g.default_days_supply <= 0 || g.max_days_supply < g.default_days_supply {
            anyhow::bail!(
                "gap days-supply bounds invalid: default={} max={}",
                g.default_days_supply, g.max_days_supply
            );
        }

        let t = &self.tiers;
        if !(t.f1_max_delay < t.f2_max_delay
            && t.f2_max_delay < t.f3_max_delay
            && t.f3_max_delay < t.f4_max_delay)
        {
            anyhow::bail!("tier delay bounds must be strictly increasing");
        }

        let q = &self.queues;
        if !(q.critical > q.high && q.high > q.watch && q.watch > q.medium) {
            anyhow::bail!("queue thresholds must be strictly decreasing from critical to medium");
        }

        if self.priority.q4_months.iter().any(|m| !(1..=12).contains(m)) {
            anyhow::bail!("priority.q4_months must hold calendar months 1..=12");
        }
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Built-in value sets. The JSON under data/value_sets mirrors these.
pub fn default_value_sets() -> Vec<MeasureValueSet> {
    vec![
        MeasureValueSet {
            measure:      Measure::Mac,
            label:        "Statins".into(),
            rxnorm_codes: strings(&["83367", "36567", "301542", "42463", "6472"]),
            ingredients:  strings(&[
                "atorvastatin", "fluvastatin", "lovastatin", "pitavastatin",
                "pravastatin", "rosuvastatin", "simvastatin",
            ]),
            exclusion_ingredients: Vec::new(),
        },
        MeasureValueSet {
            measure:      Measure::Mad,
            label:        "Non-insulin diabetes medications".into(),
            rxnorm_codes: strings(&["6809", "4821", "593411", "1545653"]),
            ingredients:  strings(&[
                "metformin", "glipizide", "glimepiride", "glyburide",
                "pioglitazone", "rosiglitazone", "sitagliptin", "saxagliptin",
                "linagliptin", "alogliptin", "liraglutide", "dulaglutide",
                "semaglutide", "exenatide", "repaglinide", "nateglinide",
                "canagliflozin", "dapagliflozin", "empagliflozin", "ertugliflozin",
            ]),
            exclusion_ingredients: strings(&["insulin"]),
        },
        MeasureValueSet {
            measure:      Measure::Mah,
            label:        "RAS antagonists".into(),
            rxnorm_codes: strings(&["29046", "52175", "69749", "3827", "35296"]),
            ingredients:  strings(&[
                "benazepril", "captopril", "enalapril", "fosinopril", "lisinopril",
                "moexipril", "perindopril", "quinapril", "ramipril", "trandolapril",
                "azilsartan", "candesartan", "eprosartan", "irbesartan", "losartan",
                "olmesartan", "telmisartan", "valsartan", "aliskiren",
            ]),
            exclusion_ingredients: strings(&["sacubitril"]),
        },
    ]
}
