//! Retrieval quality of a published index.
//!
//! Queries are encoded with the index's committed projection and the
//! database is ranked by Hamming distance (ties broken by database order).
//! A database item is relevant to a query iff they share a label.
//!
//! Metrics:
//! - Mean Average Precision (mAP) over the full ranking
//! - Precision@k: fraction of the top k that is relevant
//! - Recall@k: fraction of all relevant items found in the top k
//!
//! Queries with no relevant database item score zero on every metric.

use crate::checkpoint::Checkpoint;
use crate::codes::BinaryCodes;
use crate::dataset::{shares_label, Dataset, Labels};
use crate::error::{OnlineError, Result};
use crate::index::PublishedIndex;
use serde::{Deserialize, Serialize};

/// Aggregated retrieval metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub n_queries: usize,
    pub k: usize,
    pub map: f64,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
}

/// Database rows ordered by Hamming distance to query row `q`.
///
/// Bucketed by distance, so ties keep database order.
pub fn hamming_ranking(query_codes: &BinaryCodes, q: usize, database: &BinaryCodes) -> Vec<usize> {
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); database.bits() + 1];
    for r in 0..database.rows() {
        buckets[query_codes.hamming(q, database, r) as usize].push(r);
    }
    buckets.into_iter().flatten().collect()
}

/// Average precision of a ranked relevance list (0 if nothing is relevant).
pub fn average_precision(relevance: &[bool]) -> f64 {
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (rank, &rel) in relevance.iter().enumerate() {
        if rel {
            hits += 1;
            sum += hits as f64 / (rank + 1) as f64;
        }
    }
    if hits == 0 {
        0.0
    } else {
        sum / hits as f64
    }
}

/// Evaluate `index` (built over a database with `database_labels`) on `queries`.
pub fn evaluate(
    index: &PublishedIndex,
    database_labels: &Labels,
    queries: &Dataset,
    k: usize,
) -> Result<RetrievalMetrics> {
    let db_codes = index.codes();
    if database_labels.len() != db_codes.rows() {
        return Err(OnlineError::DimensionMismatch {
            expected: db_codes.rows(),
            actual: database_labels.len(),
        });
    }
    if !queries.labels().is_labeled() || !database_labels.is_labeled() {
        return Err(OnlineError::InvalidConfig(
            "retrieval evaluation needs labelled queries and database".into(),
        ));
    }
    if queries.is_empty() {
        return Err(OnlineError::EmptyInput("no queries to evaluate".into()));
    }

    let query_codes = index.committed().encode(queries.features())?;
    let mut map = 0.0;
    let mut precision = 0.0;
    let mut recall = 0.0;

    for q in 0..queries.len() {
        let Some(lq) = queries.labels().get(q) else {
            continue;
        };
        let relevance: Vec<bool> = hamming_ranking(&query_codes, q, db_codes)
            .into_iter()
            .map(|r| database_labels.get(r).is_some_and(|lr| shares_label(lq, lr)))
            .collect();
        let total_relevant = relevance.iter().filter(|&&r| r).count();
        if total_relevant == 0 {
            continue;
        }
        let top = k.min(relevance.len());
        let hits = relevance[..top].iter().filter(|&&r| r).count();

        map += average_precision(&relevance);
        if k > 0 {
            precision += hits as f64 / k as f64;
        }
        recall += hits as f64 / total_relevant as f64;
    }

    let n = queries.len() as f64;
    Ok(RetrievalMetrics {
        n_queries: queries.len(),
        k,
        map: map / n,
        precision_at_k: precision / n,
        recall_at_k: recall / n,
    })
}

/// Evaluate the index stored in a checkpoint.
pub fn evaluate_checkpoint(
    checkpoint: &Checkpoint,
    database_labels: &Labels,
    queries: &Dataset,
    k: usize,
) -> Result<RetrievalMetrics> {
    evaluate(&checkpoint.index, database_labels, queries, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;
    use crate::projection::Projection;

    #[test]
    fn test_average_precision() {
        assert!((average_precision(&[true, false, true]) - (1.0 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        assert_eq!(average_precision(&[false, false]), 0.0);
        assert_eq!(average_precision(&[true, true]), 1.0);
    }

    #[test]
    fn test_hamming_ranking_stable_ties() {
        let db = BinaryCodes::from_bools(&[
            vec![true, true],
            vec![false, false],
            vec![true, false],
            vec![false, false],
        ])
        .unwrap();
        let q = BinaryCodes::from_bools(&[vec![false, false]]).unwrap();
        assert_eq!(hamming_ranking(&q, 0, &db), vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_perfect_codes_give_perfect_map() {
        let db_features = Matrix::from_rows(vec![
            vec![1.0, 0.1],
            vec![1.0, 0.2],
            vec![-1.0, 0.1],
            vec![-1.0, 0.3],
        ])
        .unwrap();
        let db_labels = Labels::from_classes(&[0, 0, 1, 1]);
        let hyperplanes = Matrix::from_rows(vec![vec![1.0, 0.0]]).unwrap();
        let w = Projection::from_hyperplanes(hyperplanes).unwrap();
        let index = PublishedIndex::build(&db_features, w).unwrap();

        let queries = Dataset::new(
            Matrix::from_rows(vec![vec![0.5, 0.0], vec![-0.5, 0.0]]).unwrap(),
            Labels::from_classes(&[0, 1]),
        )
        .unwrap();
        let metrics = evaluate(&index, &db_labels, &queries, 2).unwrap();
        assert_eq!(metrics.n_queries, 2);
        assert!((metrics.map - 1.0).abs() < 1e-12);
        assert!((metrics.precision_at_k - 1.0).abs() < 1e-12);
        assert!((metrics.recall_at_k - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unlabeled_rejected() {
        let features = Matrix::from_rows(vec![vec![1.0]]).unwrap();
        let w = Projection::gaussian(1, 2, 0).unwrap();
        let index = PublishedIndex::build(&features, w).unwrap();
        let queries = Dataset::unlabeled(features);
        assert!(evaluate(&index, &Labels::from_classes(&[0]), &queries, 1).is_err());
    }
}
