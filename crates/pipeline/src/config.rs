// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! dest_sync = "half"
//! fp32_dest_acc = false
//! math_fidelity = "hifi4"
//! unpack_contexts = 2
//! sanitize = true
//! trace_events = false
//! watchdog_ms = 2000
//! l1_size = "1464K"
//! ```

use crate::PipelineError;
use l1_memory::L1Region;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How the destination register is shared between math and pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestSync {
    /// Two halves: math fills one while pack drains the other.
    #[default]
    Half,
    /// One section: math and pack take turns on the whole register.
    Full,
}

impl DestSync {
    /// Maximum of the math/pack semaphore: sections math may fill ahead.
    pub fn sections(self) -> u32 {
        match self {
            DestSync::Half => 2,
            DestSync::Full => 1,
        }
    }
}

impl FromStr for DestSync {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "half" | "synchalf" => Ok(DestSync::Half),
            "full" | "syncfull" => Ok(DestSync::Full),
            other => Err(PipelineError::Config(format!(
                "unknown dest sync '{other}'; expected 'half' or 'full'"
            ))),
        }
    }
}

impl fmt::Display for DestSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestSync::Half => f.write_str("half"),
            DestSync::Full => f.write_str("full"),
        }
    }
}

/// Multiply precision: number of fidelity phases per multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathFidelity {
    LoFi,
    HiFi2,
    HiFi3,
    #[default]
    HiFi4,
}

impl MathFidelity {
    pub fn phases(self) -> u32 {
        match self {
            MathFidelity::LoFi => 1,
            MathFidelity::HiFi2 => 2,
            MathFidelity::HiFi3 => 3,
            MathFidelity::HiFi4 => 4,
        }
    }
}

impl FromStr for MathFidelity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lofi" => Ok(MathFidelity::LoFi),
            "hifi2" => Ok(MathFidelity::HiFi2),
            "hifi3" => Ok(MathFidelity::HiFi3),
            "hifi4" => Ok(MathFidelity::HiFi4),
            other => Err(PipelineError::Config(format!(
                "unknown math fidelity '{other}'; expected 'lofi', 'hifi2', 'hifi3' or 'hifi4'"
            ))),
        }
    }
}

impl fmt::Display for MathFidelity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MathFidelity::LoFi => f.write_str("lofi"),
            MathFidelity::HiFi2 => f.write_str("hifi2"),
            MathFidelity::HiFi3 => f.write_str("hifi3"),
            MathFidelity::HiFi4 => f.write_str("hifi4"),
        }
    }
}

/// Configuration for the compute pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    /// Destination register sharing mode.
    #[serde(default)]
    pub dest_sync: DestSync,
    /// Accumulate in fp32 (halves destination capacity).
    #[serde(default)]
    pub fp32_dest_acc: bool,
    /// Multiply fidelity.
    #[serde(default)]
    pub math_fidelity: MathFidelity,
    /// Unpacker config contexts allowed in flight (1 or 2).
    #[serde(default = "default_contexts")]
    pub unpack_contexts: u32,
    /// Run the per-stage state tracker.
    #[serde(default = "default_true")]
    pub sanitize: bool,
    /// Record hardware events for inspection.
    #[serde(default)]
    pub trace_events: bool,
    /// Watchdog limit for one run, in milliseconds.
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    /// Top of L1 (human-readable, e.g. `"1464K"`).
    #[serde(default = "default_l1_size")]
    pub l1_size: String,
}

fn default_true() -> bool {
    true
}

fn default_contexts() -> u32 {
    2
}

fn default_watchdog_ms() -> u64 {
    2000
}

fn default_l1_size() -> String {
    "1464K".to_string()
}

impl PipelineConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| PipelineError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(1..=2).contains(&self.unpack_contexts) {
            return Err(PipelineError::Config(format!(
                "unpack_contexts must be 1 or 2, got {}",
                self.unpack_contexts
            )));
        }
        if self.watchdog_ms == 0 {
            return Err(PipelineError::Config("watchdog_ms must be positive".into()));
        }
        self.region().map(|_| ())
    }

    /// The L1 tile-data window implied by `l1_size`.
    pub fn region(&self) -> Result<L1Region, PipelineError> {
        L1Region::with_size(&self.l1_size)
            .map_err(|e| PipelineError::Config(format!("invalid l1_size: {e}")))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dest_sync: DestSync::Half,
            fp32_dest_acc: false,
            math_fidelity: MathFidelity::HiFi4,
            unpack_contexts: default_contexts(),
            sanitize: true,
            trace_events: false,
            watchdog_ms: default_watchdog_ms(),
            l1_size: default_l1_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = PipelineConfig::default();
        assert_eq!(c.dest_sync, DestSync::Half);
        assert_eq!(c.unpack_contexts, 2);
        assert!(c.sanitize);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
dest_sync = "full"
fp32_dest_acc = true
math_fidelity = "lofi"
unpack_contexts = 1
sanitize = false
l1_size = "1M"
"#;
        let c = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(c.dest_sync, DestSync::Full);
        assert!(c.fp32_dest_acc);
        assert_eq!(c.math_fidelity, MathFidelity::LoFi);
        assert_eq!(c.unpack_contexts, 1);
        assert!(!c.sanitize);
        assert_eq!(c.watchdog_ms, 2000);
        assert_eq!(c.region().unwrap().end(), 1024 * 1024);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let c = PipelineConfig::from_toml("").unwrap();
        assert_eq!(c.math_fidelity, MathFidelity::HiFi4);
        assert!(c.sanitize);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = PipelineConfig {
            dest_sync: DestSync::Full,
            ..Default::default()
        };
        let back = PipelineConfig::from_toml(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back.dest_sync, DestSync::Full);
        assert_eq!(back.l1_size, c.l1_size);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PipelineConfig::from_toml("unpack_contexts = 3").is_err());
        assert!(PipelineConfig::from_toml("dest_sync = \"quarter\"").is_err());
        assert!(PipelineConfig::from_toml("l1_size = \"lots\"").is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("SyncHalf".parse::<DestSync>().unwrap(), DestSync::Half);
        assert_eq!("HiFi2".parse::<MathFidelity>().unwrap().phases(), 2);
        assert!("hifi5".parse::<MathFidelity>().is_err());
    }
}
