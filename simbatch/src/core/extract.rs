//! Metric catalogue and marker-line extraction.
//!
//! Each metric is identified by a marker line in the simulator's final
//! statistics and a labeled field on that line. The last marker line in the
//! output is authoritative; if it is malformed the metric is absent.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Ipc,
    L1dMpki,
    L2cMpki,
    LlcMpki,
    L1dMissLatency,
    L2cMissLatency,
    LlcMissLatency,
    L1dPrefetchAccuracy,
    L2cPrefetchAccuracy,
    LlcPrefetchAccuracy,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::Ipc,
        Metric::L1dMpki,
        Metric::L2cMpki,
        Metric::LlcMpki,
        Metric::L1dMissLatency,
        Metric::L2cMissLatency,
        Metric::LlcMissLatency,
        Metric::L1dPrefetchAccuracy,
        Metric::L2cPrefetchAccuracy,
        Metric::LlcPrefetchAccuracy,
    ];

    /// Stable key used in config files, CLI flags and store filenames.
    pub fn key(self) -> &'static str {
        match self {
            Metric::Ipc => "ipc",
            Metric::L1dMpki => "l1d_mpki",
            Metric::L2cMpki => "l2c_mpki",
            Metric::LlcMpki => "llc_mpki",
            Metric::L1dMissLatency => "l1d_miss_latency",
            Metric::L2cMissLatency => "l2c_miss_latency",
            Metric::LlcMissLatency => "llc_miss_latency",
            Metric::L1dPrefetchAccuracy => "l1d_prefetch_accuracy",
            Metric::L2cPrefetchAccuracy => "l2c_prefetch_accuracy",
            Metric::LlcPrefetchAccuracy => "llc_prefetch_accuracy",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Metric::Ipc => "cumulative instructions per cycle of CPU 0",
            Metric::L1dMpki => "L1D total misses per kilo-instruction",
            Metric::L2cMpki => "L2C total misses per kilo-instruction",
            Metric::LlcMpki => "LLC total misses per kilo-instruction",
            Metric::L1dMissLatency => "L1D average miss latency",
            Metric::L2cMissLatency => "L2C average miss latency",
            Metric::LlcMissLatency => "LLC average miss latency",
            Metric::L1dPrefetchAccuracy => "L1D useful load prefetch accuracy",
            Metric::L2cPrefetchAccuracy => "L2C useful load prefetch accuracy",
            Metric::LlcPrefetchAccuracy => "LLC useful load prefetch accuracy",
        }
    }

    fn pattern(self) -> &'static MarkerPattern {
        // `ALL` lists variants in declaration order.
        &PATTERNS[self as usize]
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|metric| metric.key() == input)
            .ok_or_else(|| {
                let known: Vec<&str> = Metric::ALL.iter().map(|metric| metric.key()).collect();
                format!("unknown metric {input:?} (expected one of: {})", known.join(", "))
            })
    }
}

struct MarkerPattern {
    /// Identifies the marker line.
    line: Regex,
    /// Captures the value token on a marker line.
    value: Regex,
}

impl MarkerPattern {
    fn new(line: &str, value: &str) -> Self {
        Self {
            line: Regex::new(line).expect("valid marker line pattern"),
            value: Regex::new(value).expect("valid marker value pattern"),
        }
    }

    fn for_metric(metric: Metric) -> Self {
        // Cache stat lines may carry a `cpu0_` style owner prefix.
        let cache_line = |cache: &str, rest: &str| format!(r"^\s*(?:\S*_)?{cache} {rest}");
        match metric {
            Metric::Ipc => Self::new(r"^\s*CPU 0 cumulative IPC:", r"IPC:\s*(\S+)"),
            Metric::L1dMpki => Self::new(&cache_line("L1D", r"TOTAL\s"), r"MPKI:\s*(\S+)"),
            Metric::L2cMpki => Self::new(&cache_line("L2C", r"TOTAL\s"), r"MPKI:\s*(\S+)"),
            Metric::LlcMpki => Self::new(&cache_line("LLC", r"TOTAL\s"), r"MPKI:\s*(\S+)"),
            Metric::L1dMissLatency => Self::new(
                &cache_line("L1D", "AVERAGE MISS LATENCY:"),
                r"LATENCY:\s*(\S+)",
            ),
            Metric::L2cMissLatency => Self::new(
                &cache_line("L2C", "AVERAGE MISS LATENCY:"),
                r"LATENCY:\s*(\S+)",
            ),
            Metric::LlcMissLatency => Self::new(
                &cache_line("LLC", "AVERAGE MISS LATENCY:"),
                r"LATENCY:\s*(\S+)",
            ),
            Metric::L1dPrefetchAccuracy => Self::new(
                &cache_line("L1D", "USEFUL LOAD PREFETCHES:"),
                r"ACCURACY:\s*(\S+)",
            ),
            Metric::L2cPrefetchAccuracy => Self::new(
                &cache_line("L2C", "USEFUL LOAD PREFETCHES:"),
                r"ACCURACY:\s*(\S+)",
            ),
            Metric::LlcPrefetchAccuracy => Self::new(
                &cache_line("LLC", "USEFUL LOAD PREFETCHES:"),
                r"ACCURACY:\s*(\S+)",
            ),
        }
    }

    fn value_on(&self, line: &str) -> Option<String> {
        let token = self.value.captures(line)?.get(1)?.as_str();
        let parsed: f64 = token.parse().ok()?;
        parsed.is_finite().then(|| token.to_string())
    }
}

static PATTERNS: LazyLock<Vec<MarkerPattern>> = LazyLock::new(|| {
    Metric::ALL
        .iter()
        .map(|metric| MarkerPattern::for_metric(*metric))
        .collect()
});

/// Scan lines and return the metric value from the last marker line.
///
/// `None` when no marker line exists or the last one has no finite numeric
/// token at the expected field.
pub fn extract_metric<'a, I>(metric: Metric, lines: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let pattern = metric.pattern();
    let mut last_marker = None;
    for line in lines {
        if pattern.line.is_match(line) {
            last_marker = Some(line);
        }
    }
    last_marker.and_then(|line| pattern.value_on(line))
}
