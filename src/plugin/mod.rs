//! The plugin instance: initialization, the per-event parse loop, and the
//! extract capability.
//!
//! The host owns one [`Plugin`] per configuration epoch and drives it from
//! its own threads. Parse updates the sketches and the per-thread
//! `lastevent_fd` bookkeeping; extract reads the sketches. Init-time
//! failures are loud (`Result`), hot-path failures degrade silently so the
//! event stream keeps flowing.

use std::collections::HashSet;
use std::time::SystemTime;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::event::{decode, Event, EventCode};
use crate::extract;
use crate::profile::{parse_profile, Selector};
use crate::sketch::{Cms, SketchBank};
use crate::table::ThreadTable;

/// A field extraction request from the host rules engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRequest {
    /// `anomaly.count_min_sketch[i]`: frequency estimate of the current
    /// event's fingerprint under behavior profile `i`.
    SketchCount { index: usize },
    /// `anomaly.count_min_sketch.profile[i]`: the fingerprint itself.
    SketchProfile { index: usize },
    /// `anomaly.falco.duration_ns`: nanoseconds since the host process
    /// started.
    DurationNs,
}

/// An extracted field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U64(u64),
    Str(String),
}

/// Extraction failures surfaced to the host's error channel. Per-field
/// value misses are not errors; they show up as empty strings or zeros.
#[derive(Error, Debug, PartialEq)]
pub enum ExtractError {
    #[error("count_min_sketch disabled, but `anomaly.count_min_sketch` field referenced")]
    SketchesDisabled,

    #[error("sketch index {index} out of bounds for {n} sketches")]
    IndexOutOfBounds { index: usize, n: usize },
}

/// Static descriptor of one exposed field.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub name: &'static str,
    pub value_type: &'static str,
    /// Whether the field takes an `[i]` sketch index argument.
    pub indexed: bool,
    pub description: &'static str,
}

/// The fields this plugin exposes to the host rules engine.
pub fn fields() -> &'static [FieldInfo] {
    &[
        FieldInfo {
            name: "anomaly.count_min_sketch",
            value_type: "uint64",
            indexed: true,
            description: "Count-Min Sketch frequency estimate of the current event's \
                          behavior profile fingerprint",
        },
        FieldInfo {
            name: "anomaly.count_min_sketch.profile",
            value_type: "string",
            indexed: true,
            description: "Concatenated behavior profile fingerprint string",
        },
        FieldInfo {
            name: "anomaly.falco.duration_ns",
            value_type: "uint64",
            indexed: false,
            description: "Host agent run duration in nanoseconds, useful for ignoring \
                          rare events while the sketch counts are still warming up",
        },
    ]
}

/// A behavior profile compiled for the dispatch loop.
struct CompiledProfile {
    selectors: Vec<Selector>,
    event_codes: HashSet<EventCode>,
}

/// The anomaly-detection plugin instance.
pub struct Plugin {
    enabled: bool,
    profiles: Vec<CompiledProfile>,
    bank: SketchBank,
    /// Host process start, nanoseconds since the epoch. Captured once at
    /// init from the ctime of /proc/self/cmdline.
    start_ts_epoch_ns: u64,
    last_error: parking_lot::Mutex<String>,
}

impl Plugin {
    /// Builds a plugin from the host-provided JSON init configuration.
    /// Sketches are allocated here; reset workers spawn on [`start`].
    ///
    /// [`start`]: Plugin::start
    pub fn init(config_json: &str) -> Result<Self> {
        let cfg = Config::from_json(config_json)?;
        let (enabled, profiles, bank) = Self::build(&cfg)?;

        Ok(Self {
            enabled,
            profiles,
            bank,
            start_ts_epoch_ns: process_start_epoch_ns(),
            last_error: parking_lot::Mutex::new(String::new()),
        })
    }

    /// Spawns the reset workers. Must be called from within a tokio
    /// runtime when any profile configures a reset period.
    pub fn start(&self) {
        if self.enabled {
            self.bank.start();
        }
    }

    /// Signals reset workers to stop; they exit within one period.
    pub fn stop(&self) {
        self.bank.shutdown();
    }

    /// Waits for all reset workers to exit.
    pub async fn wait_for_shutdown(&self) {
        self.bank.wait_for_shutdown().await;
    }

    /// Hot reload: drains the previous reset workers, then rebuilds the
    /// sketch bank and profiles from the new configuration and restarts.
    pub async fn reconfigure(&mut self, config_json: &str) -> Result<()> {
        // Validate the new configuration before touching the running bank,
        // so a bad reload leaves the previous epoch intact.
        let cfg = Config::from_json(config_json)?;

        self.bank.shutdown();
        self.bank.wait_for_shutdown().await;

        let (enabled, profiles, bank) = Self::build(&cfg)?;
        self.enabled = enabled;
        self.profiles = profiles;
        self.bank = bank;
        self.start();

        info!(sketches = self.bank.len(), "plugin reconfigured");
        Ok(())
    }

    fn build(cfg: &Config) -> Result<(bool, Vec<CompiledProfile>, SketchBank)> {
        let cms_cfg = &cfg.count_min_sketch;
        if !cms_cfg.enabled {
            return Ok((false, Vec::new(), SketchBank::new(Vec::new(), &[])));
        }

        let n = cms_cfg.n_sketches as usize;

        let mut sketches = Vec::with_capacity(n);
        if !cms_cfg.rows_cols.is_empty() {
            if !cms_cfg.gamma_eps.is_empty() {
                info!("rows_cols overrides the configured gamma_eps sketch dimensions");
            }
            for (i, &[rows, cols]) in cms_cfg.rows_cols.iter().enumerate() {
                let cms = Cms::with_dims(rows, cols)
                    .with_context(|| format!("allocating sketch {}", i + 1))?;
                info!(
                    sketch = i + 1,
                    rows,
                    cols,
                    gamma = Cms::gamma_from_rows(rows),
                    eps = Cms::eps_from_cols(cols),
                    bytes = cms.size_bytes(),
                    "count min sketch allocated from explicit dimensions",
                );
                sketches.push(cms);
            }
        } else {
            for (i, &[gamma, eps]) in cms_cfg.gamma_eps.iter().enumerate() {
                let cms = Cms::with_gamma_eps(gamma, eps)
                    .with_context(|| format!("allocating sketch {}", i + 1))?;
                info!(
                    sketch = i + 1,
                    gamma,
                    eps,
                    rows = cms.rows(),
                    cols = cms.cols(),
                    bytes = cms.size_bytes(),
                    "count min sketch allocated from error parameters",
                );
                sketches.push(cms);
            }
        }

        let mut profiles = Vec::with_capacity(n);
        let mut reset_periods = Vec::with_capacity(n);
        for (i, profile_cfg) in cms_cfg.behavior_profiles.iter().enumerate() {
            // Validation already vetted every code.
            let event_codes: HashSet<EventCode> = profile_cfg
                .event_codes
                .iter()
                .filter_map(|&raw| EventCode::from_u32(raw))
                .collect();

            let reset_ms = profile_cfg.effective_reset_ms();
            info!(
                profile = i + 1,
                fields = %profile_cfg.fields,
                event_codes = ?profile_cfg.event_codes,
                reset_timer_ms = reset_ms,
                "behavior profile loaded",
            );

            profiles.push(CompiledProfile {
                selectors: parse_profile(&profile_cfg.fields),
                event_codes,
            });
            reset_periods.push(reset_ms);
        }

        Ok((true, profiles, SketchBank::new(sketches, &reset_periods)))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sketch_count(&self) -> usize {
        self.bank.len()
    }

    /// Number of live reset workers; drops to the new configuration's
    /// count after a reload drains the previous generation.
    pub fn reset_worker_count(&self) -> usize {
        self.bank.worker_count()
    }

    /// The most recent extraction error, for the host's error channel.
    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    /// Processes one captured event: updates the originating thread's
    /// `lastevent_fd` for fd-producing events, then updates every sketch
    /// whose profile applies to the event type.
    ///
    /// Returns false when the event could not be parsed (missing fd
    /// parameter, non-positive tid); the plugin itself stays healthy.
    pub fn parse_event(&self, evt: &Event, table: &mut ThreadTable) -> bool {
        if !self.enabled {
            return true;
        }

        if let Some(slot) = evt.code.fd_param_slot() {
            let Some(fd) = decode::param_i64(evt, slot) else {
                return false;
            };
            // Unknown threads keep flowing: the extractor falls back to raw
            // event parameters for them.
            if let Some(entry) = table.get_mut(evt.tid) {
                entry.lastevent_fd = fd;
            }
        }

        for (i, profile) in self.profiles.iter().enumerate() {
            if !profile.event_codes.contains(&evt.code) {
                continue;
            }
            if evt.tid <= 0 {
                return false;
            }

            let fingerprint = extract::extract(evt, table, &profile.selectors);
            if fingerprint.is_empty() {
                continue;
            }
            if let Some(cms) = self.bank.get(i) {
                cms.update(fingerprint.as_bytes(), 1);
            }
        }

        true
    }

    /// Serves one field extraction request against the current event.
    ///
    /// An empty fingerprint yields a zero estimate / empty string rather
    /// than an error; only a bad index or a disabled sketch bank fails.
    pub fn extract_field(
        &self,
        req: FieldRequest,
        evt: &Event,
        table: &ThreadTable,
    ) -> Result<FieldValue, ExtractError> {
        match req {
            FieldRequest::SketchCount { index } => {
                let selectors = self.profile_selectors(index)?;
                let fingerprint = extract::extract(evt, table, selectors);
                let estimate = if fingerprint.is_empty() {
                    0
                } else {
                    self.bank
                        .get(index)
                        .map(|cms| cms.estimate(fingerprint.as_bytes()))
                        .unwrap_or(0)
                };
                Ok(FieldValue::U64(estimate))
            }

            FieldRequest::SketchProfile { index } => {
                let selectors = self.profile_selectors(index)?;
                Ok(FieldValue::Str(extract::extract(evt, table, selectors)))
            }

            FieldRequest::DurationNs => Ok(FieldValue::U64(self.duration_ns())),
        }
    }

    /// Nanoseconds since the host process started.
    pub fn duration_ns(&self) -> u64 {
        epoch_ns_now().saturating_sub(self.start_ts_epoch_ns)
    }

    fn profile_selectors(&self, index: usize) -> Result<&[Selector], ExtractError> {
        if !self.enabled {
            return Err(self.record_error(ExtractError::SketchesDisabled));
        }
        match self.profiles.get(index) {
            Some(profile) => Ok(&profile.selectors),
            None => Err(self.record_error(ExtractError::IndexOutOfBounds {
                index,
                n: self.profiles.len(),
            })),
        }
    }

    fn record_error(&self, err: ExtractError) -> ExtractError {
        *self.last_error.lock() = err.to_string();
        err
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("enabled", &self.enabled)
            .field("sketches", &self.bank.len())
            .finish()
    }
}

/// The host process start timestamp: ctime of /proc/self/cmdline, with the
/// current time as fallback on hosts without procfs.
fn process_start_epoch_ns() -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(md) = std::fs::metadata("/proc/self/cmdline") {
            return (md.ctime() as u64)
                .saturating_mul(1_000_000_000)
                .saturating_add(md.ctime_nsec() as u64);
        }
    }
    epoch_ns_now()
}

fn epoch_ns_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
