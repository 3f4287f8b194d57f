//! Smoothed categorical KL divergence
//!
//! Both distributions are smoothed with a Dirichlet pseudo-count over the
//! union of their categories, so a category seen on only one side yields a
//! finite divergence.

use std::collections::{BTreeMap, BTreeSet};

/// `KL(current || baseline)` in nats over category counts.
pub fn kl_divergence(
    current: &BTreeMap<String, u64>,
    baseline: &BTreeMap<String, u64>,
    alpha: f64,
) -> f64 {
    let categories: BTreeSet<&String> = current.keys().chain(baseline.keys()).collect();
    if categories.is_empty() {
        return 0.0;
    }
    let alpha = if alpha.is_finite() && alpha > 0.0 {
        alpha
    } else {
        1e-6
    };
    let k = categories.len() as f64;
    let n_p: f64 = current.values().sum::<u64>() as f64;
    let n_q: f64 = baseline.values().sum::<u64>() as f64;

    categories
        .into_iter()
        .map(|c| {
            let p = (current.get(c).copied().unwrap_or(0) as f64 + alpha) / (n_p + alpha * k);
            let q = (baseline.get(c).copied().unwrap_or(0) as f64 + alpha) / (n_q + alpha * k);
            p * (p / q).ln()
        })
        .sum::<f64>()
        .max(0.0)
}

/// Bucket a continuous value into a labelled histogram bin.
///
/// `edges` are ascending upper bounds; values above the last edge fall in
/// an overflow bin.
pub fn bin_label(value: f64, edges: &[f64]) -> String {
    for (i, edge) in edges.iter().enumerate() {
        if value <= *edge {
            return format!("b{i:02}");
        }
    }
    format!("b{:02}", edges.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_identical_distributions_zero() {
        let a = counts(&[("search", 50), ("social", 50)]);
        assert!(kl_divergence(&a, &a, 0.5) < 1e-12);
    }

    #[test]
    fn test_shifted_distribution_positive() {
        let base = counts(&[("search", 50), ("social", 50)]);
        let cur = counts(&[("search", 90), ("social", 10)]);
        let kl = kl_divergence(&cur, &base, 0.5);
        assert!(kl > 0.1, "kl = {kl}");
    }

    #[test]
    fn test_new_category_is_finite() {
        let base = counts(&[("search", 100)]);
        let cur = counts(&[("search", 50), ("email", 50)]);
        let kl = kl_divergence(&cur, &base, 0.5);
        assert!(kl.is_finite() && kl > 0.0);
    }

    #[test]
    fn test_bin_label() {
        let edges = [1.0, 10.0];
        assert_eq!(bin_label(0.5, &edges), "b00");
        assert_eq!(bin_label(5.0, &edges), "b01");
        assert_eq!(bin_label(50.0, &edges), "b02");
    }
}
