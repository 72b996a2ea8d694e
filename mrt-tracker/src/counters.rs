//! Aggregation of user counters reported by completed attempts.

use common::CounterMap;

/// Sums reported counters into one per-job map, capped on the number of
/// distinct counter names.
#[derive(Debug)]
pub(crate) struct CounterAggregator {
    counters: CounterMap,
    limit: usize,
}

impl CounterAggregator {
    pub fn new(limit: usize) -> Self {
        CounterAggregator {
            counters: CounterMap::new(),
            limit,
        }
    }

    pub fn restore(counters: CounterMap, limit: usize) -> Self {
        CounterAggregator { counters, limit }
    }

    /// Folds one report in. Names already known keep accumulating; new names
    /// beyond the cap are dropped, which the `false` return reports so the
    /// caller can log it.
    pub fn accumulate(&mut self, delta: &CounterMap) -> bool {
        let mut dropped = false;
        for (name, value) in delta {
            if let Some(total) = self.counters.get_mut(name) {
                *total += value;
            } else if self.counters.len() < self.limit {
                self.counters.insert(name.clone(), *value);
            } else {
                dropped = true;
            }
        }
        !dropped
    }

    pub fn snapshot(&self) -> CounterMap {
        self.counters.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(entries: &[(&str, i64)]) -> CounterMap {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn reports_sum_per_name() {
        let mut agg = CounterAggregator::new(8);
        assert!(agg.accumulate(&report(&[("rows", 10), ("bytes", 100)])));
        assert!(agg.accumulate(&report(&[("rows", 5)])));
        let totals = agg.snapshot();
        assert_eq!(totals["rows"], 15);
        assert_eq!(totals["bytes"], 100);
    }

    #[test]
    fn new_names_beyond_the_cap_are_dropped() {
        let mut agg = CounterAggregator::new(1);
        assert!(agg.accumulate(&report(&[("rows", 1)])));
        assert!(!agg.accumulate(&report(&[("bytes", 2)])));
        // Known names still accumulate while new ones keep being refused.
        assert!(!agg.accumulate(&report(&[("rows", 3), ("cells", 4)])));
        let totals = agg.snapshot();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals["rows"], 4);
    }
}
