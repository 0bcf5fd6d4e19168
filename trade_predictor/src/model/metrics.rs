use serde::Serialize;

const EPSILON: f64 = 1e-7;

/// Binary cross-entropy for one prediction, probability clipped to `[eps, 1 - eps]`.
pub fn binary_cross_entropy(probability: f64, label: f64) -> f64 {
    let p = probability.clamp(EPSILON, 1.0 - EPSILON);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

pub fn mean_binary_cross_entropy(probabilities: &[f64], labels: &[f64]) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(labels)
        .map(|(p, y)| binary_cross_entropy(*p, *y))
        .sum();
    total / probabilities.len() as f64
}

/// Fraction of predictions on the right side of 0.5.
pub fn binary_accuracy(probabilities: &[f64], labels: &[f64]) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let correct = probabilities
        .iter()
        .zip(labels)
        .filter(|(p, y)| (**p > 0.5) == (**y > 0.5))
        .count();
    correct as f64 / probabilities.len() as f64
}

/// Area under the ROC curve from score ranks, ties sharing the average rank.
///
/// `None` when only one class is present.
pub fn roc_auc(scores: &[f64], labels: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|y| **y > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(y, _)| **y > 0.5)
        .map(|(_, r)| r)
        .sum();

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub auc: Option<f64>,
}

impl Evaluation {
    pub fn compute(probabilities: &[f64], labels: &[f64]) -> Self {
        Self {
            loss: mean_binary_cross_entropy(probabilities, labels),
            accuracy: binary_accuracy(probabilities, labels),
            auc: roc_auc(probabilities, labels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bce() {
        assert!((binary_cross_entropy(0.5, 1.0) - 2f64.ln()).abs() < 1e-12);
        assert!(binary_cross_entropy(1.0, 1.0) < 1e-6);
        // Clipping keeps the loss finite.
        assert!(binary_cross_entropy(0.0, 1.0).is_finite());
    }

    #[test]
    fn test_accuracy_threshold_is_strict() {
        let acc = binary_accuracy(&[0.5, 0.51, 0.2], &[1.0, 1.0, 0.0]);
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc() {
        assert_eq!(roc_auc(&[0.1, 0.4, 0.35, 0.8], &[0.0, 0.0, 1.0, 1.0]), Some(0.75));
        assert_eq!(roc_auc(&[0.1, 0.9], &[0.0, 1.0]), Some(1.0));
        assert_eq!(roc_auc(&[0.5, 0.5], &[0.0, 1.0]), Some(0.5));
        assert_eq!(roc_auc(&[0.3, 0.6], &[1.0, 1.0]), None);
    }
}
