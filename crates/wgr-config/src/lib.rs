//! Daemon configuration: JSON file, `WGR_*` environment overrides, secret
//! hygiene, and an effective-config hash for the status endpoint.
//!
//! # Load order
//! 1. Built-in defaults.
//! 2. The JSON config file, if one is given.
//! 3. `WGR_*` environment overrides (scalars only).
//!
//! The merged document is scanned for secret-looking literal values before
//! anything else touches it — config files carry env var *names*, never
//! credentials — then hashed (SHA-256 over the canonical JSON) so operators
//! can tell at a glance which config a running daemon actually has.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use wgr_ledger::{Micros, BPS_SCALE};
use wgr_rewards::{RewardTier, TierTable};

/// Literal values starting with any of these abort the load. Config files
/// store env var names; a match here means a credential was pasted in.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Scalar keys overridable from the environment, `WGR_<KEY>` uppercased.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("WGR_LISTEN_ADDR", "listen_addr"),
    ("WGR_CURRENCY", "currency"),
    ("WGR_RECONCILE_TOLERANCE_MICROS", "reconcile_tolerance_micros"),
    ("WGR_RECONCILE_INTERVAL_SECS", "reconcile_interval_secs"),
    ("WGR_EXPIRY_SWEEP_INTERVAL_SECS", "expiry_sweep_interval_secs"),
    ("WGR_CLAIM_FEE_BPS", "claim_fee_bps"),
    ("WGR_EARNING_EXPIRY_DAYS", "earning_expiry_days"),
    ("WGR_DEFAULT_HOUSE_EDGE_BPS", "default_house_edge_bps"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub listen_addr: String,
    pub currency: String,
    /// Internal-vs-provider drift at or under this auto-heals; above it the
    /// account is flagged for manual review.
    pub reconcile_tolerance_micros: i64,
    pub reconcile_interval_secs: u64,
    pub expiry_sweep_interval_secs: u64,
    /// Withheld from claim payouts, basis points.
    pub claim_fee_bps: i64,
    pub earning_expiry_days: i64,
    /// Edge for games missing from `house_edge_bps`.
    pub default_house_edge_bps: i64,
    /// Per-game house edge, basis points.
    pub house_edge_bps: HashMap<String, i64>,
    /// Cashback tier ladder; validated on deserialization.
    pub tiers: TierTable,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            currency: "USD".to_string(),
            reconcile_tolerance_micros: 1_000_000,
            reconcile_interval_secs: 300,
            expiry_sweep_interval_secs: 3_600,
            claim_fee_bps: 0,
            earning_expiry_days: 30,
            default_house_edge_bps: 0,
            house_edge_bps: HashMap::new(),
            tiers: default_tiers(),
        }
    }
}

impl CoreConfig {
    pub fn reconcile_tolerance(&self) -> Micros {
        Micros::new(self.reconcile_tolerance_micros)
    }

    fn validate(&self) -> Result<()> {
        if self.reconcile_tolerance_micros < 0 {
            bail!("reconcile_tolerance_micros must be non-negative");
        }
        if self.earning_expiry_days <= 0 {
            bail!("earning_expiry_days must be positive");
        }
        if !(0..=BPS_SCALE).contains(&self.claim_fee_bps) {
            bail!("claim_fee_bps must be within [0, {BPS_SCALE}]");
        }
        if !(0..=BPS_SCALE).contains(&self.default_house_edge_bps) {
            bail!("default_house_edge_bps must be within [0, {BPS_SCALE}]");
        }
        for (game_id, edge) in &self.house_edge_bps {
            if !(0..=BPS_SCALE).contains(edge) {
                bail!("house edge for game '{game_id}' must be within [0, {BPS_SCALE}]");
            }
        }
        Ok(())
    }
}

/// Entry tier when the file configures none: everyone earns 0.5%.
fn default_tiers() -> TierTable {
    TierTable::new(vec![RewardTier {
        tier_level: 1,
        name: "bronze".to_string(),
        min_ggr_required: Micros::ZERO,
        cashback_bps: 50,
        daily_limit: None,
        weekly_limit: None,
        monthly_limit: None,
        special_flags: Vec::new(),
    }])
    .expect("default tier table is valid")
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CoreConfig,
    /// SHA-256 over the canonical effective JSON.
    pub config_hash: String,
    pub canonical_json: String,
}

/// Load the effective config: defaults, then file, then env overrides.
pub fn load(path: Option<&Path>) -> Result<LoadedConfig> {
    let file_json = match path {
        Some(p) => {
            let raw = fs::read_to_string(p)
                .with_context(|| format!("failed to read config file {}", p.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("config file {} is not valid JSON", p.display()))?
        }
        None => Value::Object(Default::default()),
    };
    load_from_value(file_json, &env_overrides_from_process())
}

/// Same as [`load`] with explicit inputs; what the tests drive.
pub fn load_from_value(
    file_json: Value,
    overrides: &[(String, String)],
) -> Result<LoadedConfig> {
    let defaults = serde_json::to_value(CoreConfig::default())
        .context("default config must serialize")?;
    let mut merged = deep_merge(defaults, file_json);
    apply_overrides(&mut merged, overrides)?;

    enforce_no_secret_literals(&merged)?;

    let config: CoreConfig =
        serde_json::from_value(merged.clone()).context("invalid configuration")?;
    config.validate()?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    tracing::info!(config_hash = %config_hash, "configuration loaded");

    Ok(LoadedConfig {
        config,
        config_hash,
        canonical_json,
    })
}

fn env_overrides_from_process() -> Vec<(String, String)> {
    ENV_OVERRIDES
        .iter()
        .filter_map(|(var, _)| std::env::var(var).ok().map(|v| (var.to_string(), v)))
        .collect()
}

/// Apply `WGR_*` overrides. Numeric targets parse the env value as a number;
/// a value that does not parse is a startup error, not a silent default.
fn apply_overrides(merged: &mut Value, overrides: &[(String, String)]) -> Result<()> {
    let Value::Object(map) = merged else {
        bail!("effective config must be a JSON object");
    };
    for (var, raw) in overrides {
        let Some((_, key)) = ENV_OVERRIDES.iter().find(|(v, _)| v == var) else {
            bail!("unknown override variable {var}");
        };
        let value = match map.get(*key) {
            Some(Value::String(_)) | None => Value::String(raw.clone()),
            Some(_) => serde_json::from_str(raw)
                .with_context(|| format!("{var}: '{raw}' is not a number"))?,
        };
        map.insert((*key).to_string(), value);
    }
    Ok(())
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                let existing = base_map.remove(&k).unwrap_or(Value::Null);
                base_map.insert(k, deep_merge(existing, v));
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // Key order is deterministic given deterministic input ordering; compact
    // serialization keeps the hash stable across hosts.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);
    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED");
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                collect_leaf_pointers(vv, &format!("{prefix}/{token}"), out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}
