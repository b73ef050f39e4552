// src/quota/mod.rs

//! Consumable resource vectors and their parsing.
//!
//! A [`Quota`] is a named numeric vector (e.g. cpu millicores, memory bytes,
//! launch slots). Comparisons are componentwise: a quota `fits` another only
//! if every component fits. Resources absent from a vector count as zero.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub mod manager;

pub use manager::{Admission, QuotaManager, UsageProbe};

/// Raised when a human-readable quota string cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid quota value for {resource}: {raw:?}")]
pub struct QuotaParseError {
    pub resource: String,
    pub raw: String,
}

/// A named vector of consumable resource amounts.
///
/// Units are normalized at parse time: `cpu` is stored as millicores, `mem`
/// as bytes, anything else as a plain count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quota {
    resources: BTreeMap<String, u64>,
}

impl Quota {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for assembling a quota from raw amounts.
    pub fn with(mut self, resource: impl Into<String>, amount: u64) -> Self {
        self.resources.insert(resource.into(), amount);
        self
    }

    /// Parse a mapping of resource name to human-readable value string.
    pub fn parse_spec(spec: &BTreeMap<String, String>) -> Result<Self, QuotaParseError> {
        let mut quota = Quota::new();
        for (resource, raw) in spec {
            let amount = parse_amount(resource, raw)?;
            quota.resources.insert(resource.clone(), amount);
        }
        Ok(quota)
    }

    /// Amount of a single resource; absent resources are zero.
    pub fn get(&self, resource: &str) -> u64 {
        self.resources.get(resource).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.values().all(|v| *v == 0)
    }

    /// Iterate over (resource, amount) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// `true` iff every component of `self` is <= the matching component of
    /// `capacity`.
    pub fn fits(&self, capacity: &Quota) -> bool {
        self.exceeded_resource(capacity).is_none()
    }

    /// First resource (in name order) where `self` exceeds `capacity`, if any.
    pub fn exceeded_resource(&self, capacity: &Quota) -> Option<&str> {
        self.resources
            .iter()
            .find(|(name, amount)| **amount > capacity.get(name))
            .map(|(name, _)| name.as_str())
    }

    /// Componentwise saturating addition.
    pub fn add(&self, other: &Quota) -> Quota {
        let mut out = self.clone();
        for (name, amount) in &other.resources {
            let slot = out.resources.entry(name.clone()).or_insert(0);
            *slot = slot.saturating_add(*amount);
        }
        out
    }

    /// Componentwise subtraction, floored at zero.
    ///
    /// Returns the result and the list of resources that underflowed, so
    /// callers can report a double-release instead of silently corrupting
    /// later admission decisions.
    pub fn sub_clamped(&self, other: &Quota) -> (Quota, Vec<String>) {
        let mut out = self.clone();
        let mut underflowed = Vec::new();
        for (name, amount) in &other.resources {
            let slot = out.resources.entry(name.clone()).or_insert(0);
            if *amount > *slot {
                if *amount > 0 {
                    underflowed.push(name.clone());
                }
                *slot = 0;
            } else {
                *slot -= *amount;
            }
        }
        (out, underflowed)
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, amount) in &self.resources {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}={amount}")?;
        }
        Ok(())
    }
}

/// Parse one human-readable resource value.
///
/// - `cpu`: cores with optional `m` (millicore) suffix; `"2"` → 2000,
///   `"500m"` → 500, `"1.5"` → 1500.
/// - `mem`: bytes with binary (`Ki`/`Mi`/`Gi`/`Ti`) or decimal
///   (`K`/`M`/`G`/`T`) suffixes.
/// - everything else: a plain non-negative integer.
pub fn parse_amount(resource: &str, raw: &str) -> Result<u64, QuotaParseError> {
    let err = || QuotaParseError {
        resource: resource.to_string(),
        raw: raw.to_string(),
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(err());
    }

    match resource {
        "cpu" => {
            if let Some(millis) = raw.strip_suffix('m') {
                millis.parse::<u64>().map_err(|_| err())
            } else {
                parse_scaled(raw, 1000.0).ok_or_else(err)
            }
        }
        "mem" | "memory" => {
            let (digits, scale) = split_mem_suffix(raw).ok_or_else(err)?;
            parse_scaled(digits, scale).ok_or_else(err)
        }
        _ => raw.parse::<u64>().map_err(|_| err()),
    }
}

/// Parse a decimal number and scale it into an integer amount.
fn parse_scaled(digits: &str, scale: f64) -> Option<u64> {
    let value = digits.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let scaled = value * scale;
    if scaled > u64::MAX as f64 {
        return None;
    }
    Some(scaled.round() as u64)
}

fn split_mem_suffix(raw: &str) -> Option<(&str, f64)> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];
    for (suffix, scale) in SUFFIXES {
        if let Some(digits) = raw.strip_suffix(suffix) {
            return Some((digits, *scale));
        }
    }
    Some((raw, 1.0))
}
