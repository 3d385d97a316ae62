use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::event::EventCode;
use crate::sketch::MIN_RESET_PERIOD_MS;

/// Top-level init configuration handed over by the host as a JSON object.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Count-Min Sketch anomaly scoring configuration.
    #[serde(default)]
    pub count_min_sketch: CountMinSketchConfig,
}

/// Count-Min Sketch configuration: sketch shapes and behavior profiles.
#[derive(Debug, Default, Deserialize)]
pub struct CountMinSketchConfig {
    /// Enable sketch updates and the extract fields. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Number of sketches / behavior profiles.
    #[serde(default)]
    pub n_sketches: u32,

    /// Per-sketch `[gamma, eps]` error parameters.
    #[serde(default)]
    pub gamma_eps: Vec<[f64; 2]>,

    /// Per-sketch explicit `[rows, cols]` shapes. Overrides `gamma_eps`.
    #[serde(default)]
    pub rows_cols: Vec<[u64; 2]>,

    /// One behavior profile per sketch.
    #[serde(default)]
    pub behavior_profiles: Vec<BehaviorProfileConfig>,
}

/// A behavior profile: the fingerprint field string, the event codes it
/// applies to, and an optional periodic reset.
#[derive(Debug, Clone, Deserialize)]
pub struct BehaviorProfileConfig {
    /// Space-separated profile field string, e.g.
    /// `"%proc.name %proc.cmdline %fd.name"`.
    pub fields: String,

    /// Event codes the profile's sketch updates apply to.
    pub event_codes: Vec<u32>,

    /// Reset period in milliseconds; 0 disables the reset worker.
    /// Default: 0.
    #[serde(default)]
    pub reset_timer_ms: u64,
}

impl BehaviorProfileConfig {
    /// The reset period with the minimum-threshold coercion applied:
    /// periods at or below 100 ms become 0 (no reset worker).
    pub fn effective_reset_ms(&self) -> u64 {
        if self.reset_timer_ms > MIN_RESET_PERIOD_MS {
            self.reset_timer_ms
        } else {
            0
        }
    }
}

impl Config {
    /// Parses and validates a JSON init configuration.
    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(raw).context("parsing init config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates cross-field consistency rules the JSON shape alone cannot
    /// express.
    pub fn validate(&self) -> Result<()> {
        let cms = &self.count_min_sketch;
        if !cms.enabled {
            return Ok(());
        }

        let n = cms.n_sketches as usize;
        if n < 1 {
            bail!("count_min_sketch.n_sketches must be >= 1 when enabled");
        }

        if cms.gamma_eps.is_empty() && cms.rows_cols.is_empty() {
            bail!("count_min_sketch requires either gamma_eps or rows_cols");
        }
        if !cms.gamma_eps.is_empty() && cms.gamma_eps.len() != n {
            bail!(
                "gamma_eps length {} does not match n_sketches {n}",
                cms.gamma_eps.len(),
            );
        }
        if !cms.rows_cols.is_empty() && cms.rows_cols.len() != n {
            bail!(
                "rows_cols length {} does not match n_sketches {n}",
                cms.rows_cols.len(),
            );
        }
        if cms.behavior_profiles.len() != n {
            bail!(
                "behavior_profiles length {} does not match n_sketches {n}",
                cms.behavior_profiles.len(),
            );
        }

        for (i, profile) in cms.behavior_profiles.iter().enumerate() {
            let fd_profile = profile.fields.contains("%fd");
            for &raw_code in &profile.event_codes {
                let code = EventCode::from_u32(raw_code)
                    .filter(|c| c.supported_for_profiles())
                    .with_context(|| {
                        format!(
                            "behavior profile {} contains unsupported event code {raw_code}",
                            i + 1,
                        )
                    })?;

                if fd_profile && !code.produces_fd() {
                    bail!(
                        "behavior profile {} uses %fd fields but applies to \
                         non fd-producing event code {raw_code} ({code})",
                        i + 1,
                    );
                }
            }
        }

        Ok(())
    }
}
