//! Precomputed sine tables, one per distinct waveform period.
//!
//! The additive grid folds every oscillator into its base octave, so many
//! oscillators share the same period length. Each distinct length gets one
//! immutable table built at start-up; oscillators hold cheap `Arc` handles
//! into the shared storage and index it with an integer phase.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::Arc;

pub struct SineTableBank {
    tables: HashMap<u32, Arc<[f32]>>,
}

impl SineTableBank {
    /// Build one table per distinct period length in `area_sizes`.
    pub fn build(area_sizes: impl IntoIterator<Item = u32>) -> Self {
        let mut tables = HashMap::new();
        for area in area_sizes {
            let area = area.max(2);
            tables.entry(area).or_insert_with(|| make_table(area));
        }
        Self { tables }
    }

    /// Shared handle to the table of the given period; tables not requested
    /// at build time do not exist.
    pub fn get(&self, area: u32) -> Option<Arc<[f32]>> {
        self.tables.get(&area.max(2)).cloned()
    }

    /// Shared handle, building the table first if this period is new.
    pub fn get_or_build(&mut self, area: u32) -> Arc<[f32]> {
        let area = area.max(2);
        Arc::clone(self.tables.entry(area).or_insert_with(|| make_table(area)))
    }

    pub fn distinct_tables(&self) -> usize {
        self.tables.len()
    }
}

fn make_table(area: u32) -> Arc<[f32]> {
    (0..area)
        .map(|k| (TAU * k as f32 / area as f32).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn table_holds_one_sine_period() {
        let bank = SineTableBank::build([8u32]);
        let table = bank.get(8).unwrap();
        assert_eq!(table.len(), 8);
        assert_relative_eq!(table[0], 0.0, epsilon = 1.0e-6);
        assert_relative_eq!(table[2], 1.0, epsilon = 1.0e-6);
        assert_relative_eq!(table[6], -1.0, epsilon = 1.0e-6);
    }

    #[test]
    fn duplicate_periods_share_one_table() {
        let bank = SineTableBank::build([100, 100, 100, 200]);
        assert_eq!(bank.distinct_tables(), 2);
        let a = bank.get(100).unwrap();
        let b = bank.get(100).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_period_is_absent() {
        let bank = SineTableBank::build([64u32]);
        assert!(bank.get(65).is_none());
    }
}
