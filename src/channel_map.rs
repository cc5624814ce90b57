use crate::prelude::*;

use serde::Deserialize;
use std::collections::BTreeMap;

/// Largest block a single "read holding registers" request may ask for.
pub const MAX_READ_COUNT: u16 = 125;

/// Name of the primary-key column; channels may not reuse it.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelDefinition {
    pub address: u16,
    pub name: String,
    pub divisor: f64,
}

impl ChannelDefinition {
    pub fn new(address: u16, name: &str, divisor: f64) -> Self {
        Self {
            address,
            name: name.to_string(),
            divisor,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn divisor(&self) -> f64 {
        self.divisor
    }
}

/// The fixed channel layout of the device.
///
/// Channels keep the order they were configured in; that order drives the
/// column order of the measurement table and of every normalized reading.
/// Lookups by address go through a separate index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Vec<ChannelDefinition>")]
pub struct ChannelMap {
    channels: Vec<ChannelDefinition>,
    by_address: BTreeMap<u16, usize>,
}

impl ChannelMap {
    pub fn new(channels: Vec<ChannelDefinition>) -> Result<Self> {
        if channels.is_empty() {
            bail!("channel map must contain at least one channel");
        }

        let mut by_address = BTreeMap::new();
        for (i, channel) in channels.iter().enumerate() {
            if !is_identifier(channel.name()) {
                bail!(
                    "channel name {:?} (address {}) must match [A-Za-z_][A-Za-z0-9_]*",
                    channel.name(),
                    channel.address()
                );
            }
            if channel.name().eq_ignore_ascii_case(TIMESTAMP_COLUMN) {
                bail!("channel name {:?} is reserved", channel.name());
            }
            if !channel.divisor().is_finite() || channel.divisor() <= 0.0 {
                bail!(
                    "channel {} divisor must be a positive number, got {}",
                    channel.name(),
                    channel.divisor()
                );
            }
            if by_address.insert(channel.address(), i).is_some() {
                bail!("address {} is mapped more than once", channel.address());
            }
            if channels[..i]
                .iter()
                .any(|other| other.name().eq_ignore_ascii_case(channel.name()))
            {
                bail!("channel name {} is used more than once", channel.name());
            }
        }

        let map = Self {
            channels,
            by_address,
        };

        let span = map.max_address() as u32 - map.min_address() as u32 + 1;
        if span > MAX_READ_COUNT as u32 {
            bail!(
                "channel addresses {}..={} span {} registers, more than the {} a single read allows",
                map.min_address(),
                map.max_address(),
                span,
                MAX_READ_COUNT
            );
        }

        Ok(map)
    }

    pub fn get(&self, address: u16) -> Option<&ChannelDefinition> {
        self.position(address).map(|i| &self.channels[i])
    }

    /// Index of the channel at `address` within configured order.
    pub fn position(&self, address: u16) -> Option<usize> {
        self.by_address.get(&address).copied()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelDefinition> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    // a constructed map is never empty, so the index always has both ends
    pub fn min_address(&self) -> u16 {
        self.by_address.keys().next().copied().unwrap_or_default()
    }

    pub fn max_address(&self) -> u16 {
        self.by_address.keys().next_back().copied().unwrap_or_default()
    }
}

impl TryFrom<Vec<ChannelDefinition>> for ChannelMap {
    type Error = anyhow::Error;

    fn try_from(channels: Vec<ChannelDefinition>) -> Result<Self> {
        Self::new(channels)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
