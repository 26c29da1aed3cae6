//! Whole-column numeric statistics shared by cleaning, scoring and storage.

use std::collections::HashMap;

/// Running accumulator over the finite values of a column.
#[derive(Debug, Clone, Default)]
pub struct NumericAccumulator {
    values: Vec<f64>,
    sum: f64,
    sum_squares: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl NumericAccumulator {
    pub fn from_values(values: &[f64]) -> Self {
        let mut acc = Self::default();
        for value in values {
            acc.add_value(*value);
        }
        acc
    }

    /// Non-finite values are ignored.
    pub fn add_value(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.sum += value;
        self.sum_squares += value * value;
        self.min = Some(self.min.map_or(value, |current| current.min(value)));
        self.max = Some(self.max.map_or(value, |current| current.max(value)));
        self.values.push(value);
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum / self.count() as f64)
        }
    }

    pub fn median(&self) -> Option<f64> {
        self.quantile(0.5)
    }

    /// Quantile with linear interpolation between closest ranks.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let sorted = self.sorted();
        let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lower = position.floor() as usize;
        let upper = position.ceil() as usize;
        let fraction = position - lower as f64;
        Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
    }

    /// Sample standard deviation (n - 1 denominator).
    pub fn std_dev(&self) -> Option<f64> {
        let count = self.count();
        if count < 2 {
            return None;
        }
        let mean = self.mean()?;
        let variance = (self.sum_squares - count as f64 * mean * mean) / (count as f64 - 1.0);
        Some(variance.max(0.0).sqrt())
    }

    /// Adjusted Fisher-Pearson skewness. `None` for fewer than three values
    /// or when every value is the same.
    pub fn skewness(&self) -> Option<f64> {
        let count = self.count();
        if count < 3 {
            return None;
        }
        let n = count as f64;
        let mean = self.mean()?;
        let (m2, m3) = self.values.iter().fold((0.0, 0.0), |(m2, m3), value| {
            let delta = value - mean;
            (m2 + delta * delta, m3 + delta * delta * delta)
        });
        let m2 = m2 / n;
        let m3 = m3 / n;
        if m2 <= f64::EPSILON * mean.abs().max(1.0) {
            return None;
        }
        let g1 = m3 / m2.powf(1.5);
        Some(g1 * (n * (n - 1.0)).sqrt() / (n - 2.0))
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl NumericSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let acc = NumericAccumulator::from_values(values);
        Some(Self {
            min: acc.min()?,
            max: acc.max()?,
            mean: acc.mean()?,
            median: acc.median()?,
        })
    }
}

/// Most frequent value; ties resolve to the smallest.
pub fn mode<'a, T, I>(values: I) -> Option<T>
where
    T: Ord + std::hash::Hash + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut counts: HashMap<&T, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a, a_count), (b, b_count)| a_count.cmp(b_count).then_with(|| b.cmp(a)))
        .map(|(value, _)| value.clone())
}
