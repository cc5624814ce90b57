use crate::prelude::*;
use crate::transport::RawReading;

/// Calibrated values for one sample, in channel map order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedReading {
    values: Vec<(String, f64)>,
}

impl NormalizedReading {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<(&str, f64)>> for NormalizedReading {
    fn from(values: Vec<(&str, f64)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }
}

/// Converts a raw block into calibrated values.
///
/// Every register in the block whose address is mapped yields
/// `raw / divisor`; unmapped addresses are skipped, and mapped channels the
/// block does not reach are left out. Output follows channel map order.
pub fn normalize(channel_map: &ChannelMap, raw: &RawReading) -> NormalizedReading {
    let mut found: Vec<Option<f64>> = vec![None; channel_map.len()];

    for (address, value) in raw.pairs() {
        match (channel_map.position(address), channel_map.get(address)) {
            (Some(position), Some(channel)) => {
                found[position] = Some(value as f64 / channel.divisor());
            }
            _ => trace!("address {} is not mapped, skipping", address),
        }
    }

    NormalizedReading {
        values: channel_map
            .iter()
            .zip(found)
            .filter_map(|(channel, value)| value.map(|v| (channel.name().to_string(), v)))
            .collect(),
    }
}
