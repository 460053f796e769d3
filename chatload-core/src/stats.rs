use std::collections::BTreeMap;

/// Latency values keyed by integer percentile, parsed from a `STATS` reply.
///
/// Only tokens of the form `p<digits>=<value>` are kept; everything else in the reply is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PercentileMap {
    values: BTreeMap<u32, f64>,
}

impl PercentileMap {
    pub fn parse(text: &str) -> Self {
        let values = text.split_whitespace().filter_map(parse_token).collect();
        Self { values }
    }

    pub fn get(&self, percentile: u32) -> Option<f64> {
        self.values.get(&percentile).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.values.iter().map(|(p, v)| (*p, *v))
    }
}

impl FromIterator<(u32, f64)> for PercentileMap {
    fn from_iter<I: IntoIterator<Item = (u32, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn parse_token(token: &str) -> Option<(u32, f64)> {
    let (key, value) = token.strip_prefix('p')?.split_once('=')?;
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((key.parse().ok()?, value.parse().ok()?))
}

/// One `STATS` reply together with its position in the measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSample {
    pub raw: String,
    pub percentiles: PercentileMap,
    /// Seconds since the measurement phase started.
    pub elapsed: f64,
}

impl StatsSample {
    pub fn new(raw: String, elapsed: f64) -> Self {
        let percentiles = PercentileMap::parse(&raw);
        Self {
            raw,
            percentiles,
            elapsed,
        }
    }
}
