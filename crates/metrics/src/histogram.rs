use serde::Serialize;

/// Upper bounds (ms) of each latency bucket; the last is implicitly +inf.
pub const LATENCY_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0, 30000.0,
    60000.0,
];

/// A fixed-bucket latency histogram with linear-interpolated percentiles.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    counts: Vec<u64>,
    sum_ms: f64,
    total: u64,
    min_ms: f64,
    max_ms: f64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            counts: vec![0; LATENCY_BUCKETS_MS.len() + 1],
            sum_ms: 0.0,
            total: 0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
        }
    }

    pub fn record(&mut self, value_ms: f64) {
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.counts[idx] += 1;
        self.sum_ms += value_ms;
        self.total += 1;
        self.min_ms = self.min_ms.min(value_ms);
        self.max_ms = self.max_ms.max(value_ms);
    }

    pub fn count(&self) -> u64 {
        self.total
    }

    pub fn mean_ms(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sum_ms / self.total as f64
        }
    }

    pub fn min_ms(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.min_ms
        }
    }

    pub fn max_ms(&self) -> f64 {
        self.max_ms
    }

    /// Percentile via linear interpolation across cumulative bucket counts.
    /// `p` in `0.0..=100.0`.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let target = (p / 100.0) * self.total as f64;
        let mut cumulative = 0.0;
        let mut prev_bound = 0.0;

        for (i, &count) in self.counts.iter().enumerate() {
            let bound = LATENCY_BUCKETS_MS
                .get(i)
                .copied()
                .unwrap_or(LATENCY_BUCKETS_MS[LATENCY_BUCKETS_MS.len() - 1] * 2.0);
            let next_cumulative = cumulative + count as f64;
            if next_cumulative >= target && count > 0 {
                let within = (target - cumulative) / count as f64;
                return prev_bound + within * (bound - prev_bound);
            }
            cumulative = next_cumulative;
            prev_bound = bound;
        }
        prev_bound
    }

    pub fn to_dict(&self) -> serde_json::Value {
        let mut buckets = serde_json::Map::new();
        for (i, &bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            buckets.insert(bound.to_string(), serde_json::json!(self.counts[i]));
        }
        buckets.insert("+Inf".to_string(), serde_json::json!(self.counts[LATENCY_BUCKETS_MS.len()]));

        serde_json::json!({
            "count": self.total,
            "sum_ms": self.sum_ms,
            "min_ms": self.min_ms(),
            "max_ms": self.max_ms(),
            "mean_ms": self.mean_ms(),
            "p50": self.percentile(50.0),
            "p95": self.percentile(95.0),
            "p99": self.percentile(99.0),
            "buckets": buckets,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
