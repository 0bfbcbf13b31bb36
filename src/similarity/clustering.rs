//! Density-based grouping over standardized feature vectors.
//!
//! Columns are standardized to zero mean and unit variance, pairwise
//! cosine similarity becomes a distance matrix, and DBSCAN over the
//! precomputed distances yields groups. Noise points and singletons are
//! discarded. Deterministic for a fixed input and parameters.

use ndarray::{Array2, Axis};

use crate::db::{DiscoveredGroup, EmbeddingRecord};

/// Groups embeddings by visual similarity. Fewer than `min_samples`
/// records can never form a group.
pub fn find_similar_groups(
    records: &[EmbeddingRecord],
    eps: f32,
    min_samples: usize,
) -> Vec<DiscoveredGroup> {
    if records.len() < min_samples.max(2) {
        return Vec::new();
    }

    let dim = records[0].embedding.len();
    if dim == 0 || records.iter().any(|r| r.embedding.len() != dim) {
        tracing::warn!("Inconsistent embedding dimensions, skipping grouping");
        return Vec::new();
    }

    let flat: Vec<f32> = records.iter().flat_map(|r| r.embedding.clone()).collect();
    let mut matrix = match Array2::from_shape_vec((records.len(), dim), flat) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };

    standardize(&mut matrix);
    let similarity = cosine_matrix(&matrix);
    let distance = similarity.mapv(|s| (1.0 - s).clamp(0.0, 2.0));
    let labels = dbscan(&distance, eps, min_samples);

    let cluster_count = labels.iter().flatten().copied().max().map_or(0, |m| m + 1);
    let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); cluster_count];
    for (point, label) in labels.iter().enumerate() {
        if let Some(cluster) = label {
            clusters[*cluster].push(point);
        }
    }

    clusters
        .into_iter()
        .filter(|members| members.len() >= 2)
        .enumerate()
        .map(|(index, members)| {
            let score = mean_pairwise_similarity(&similarity, &members);
            DiscoveredGroup {
                name: format!("Similar photos {}", index + 1),
                description: format!("{} similar photos", members.len()),
                similarity_score: score,
                members: members
                    .into_iter()
                    .map(|point| (records[point].photo_id, score))
                    .collect(),
            }
        })
        .collect()
}

/// Zero mean, unit variance per column. Constant columns are left at
/// zero rather than dividing by a vanishing spread.
fn standardize(matrix: &mut Array2<f32>) {
    let rows = matrix.nrows() as f32;
    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / rows;
        let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / rows;
        let std = variance.sqrt();
        if std > f32::EPSILON {
            column.mapv_inplace(|v| (v - mean) / std);
        } else {
            column.fill(0.0);
        }
    }
}

/// Pairwise cosine similarity between rows. A zero row is orthogonal to
/// everything but identical to itself.
fn cosine_matrix(matrix: &Array2<f32>) -> Array2<f32> {
    let n = matrix.nrows();
    let norms: Vec<f32> = matrix
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|v| v * v).sum::<f32>().sqrt())
        .collect();

    let mut result = Array2::zeros((n, n));
    for i in 0..n {
        result[(i, i)] = 1.0;
        for j in i + 1..n {
            let value = if norms[i] > f32::EPSILON && norms[j] > f32::EPSILON {
                matrix.row(i).dot(&matrix.row(j)) / (norms[i] * norms[j])
            } else {
                0.0
            };
            result[(i, j)] = value;
            result[(j, i)] = value;
        }
    }
    result
}

/// DBSCAN over a precomputed distance matrix. Returns one label per
/// point; None marks noise. Expansion order follows point indices, so
/// the partition is stable across runs.
fn dbscan(distance: &Array2<f32>, eps: f32, min_samples: usize) -> Vec<Option<usize>> {
    let n = distance.nrows();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0;

    let neighbors = |point: usize| -> Vec<usize> {
        (0..n).filter(|&other| distance[(point, other)] <= eps).collect()
    };

    for point in 0..n {
        if visited[point] {
            continue;
        }
        visited[point] = true;

        let seed = neighbors(point);
        if seed.len() < min_samples {
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[point] = Some(cluster);

        let mut queue: std::collections::VecDeque<usize> = seed.into();
        while let Some(candidate) = queue.pop_front() {
            if labels[candidate].is_none() {
                labels[candidate] = Some(cluster);
            }
            if visited[candidate] {
                continue;
            }
            visited[candidate] = true;

            let reach = neighbors(candidate);
            if reach.len() >= min_samples {
                queue.extend(reach);
            }
        }
    }
    labels
}

/// Mean similarity over the distinct pairs of a group.
fn mean_pairwise_similarity(similarity: &Array2<f32>, members: &[usize]) -> f32 {
    let mut sum = 0.0;
    let mut pairs = 0;
    for (index, &a) in members.iter().enumerate() {
        for &b in &members[index + 1..] {
            sum += similarity[(a, b)];
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        sum / pairs as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(photo_id: i64, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            photo_id,
            path: format!("/photos/{}.jpg", photo_id),
            embedding,
        }
    }

    /// Two tight clusters and one outlier, in a space where the cluster
    /// separation survives standardization.
    fn sample_records() -> Vec<EmbeddingRecord> {
        vec![
            record(1, vec![1.0, 0.1, 0.0, 5.0]),
            record(2, vec![1.1, 0.1, 0.0, 5.1]),
            record(3, vec![0.9, 0.2, 0.0, 4.9]),
            record(4, vec![-1.0, 5.0, 3.0, 0.0]),
            record(5, vec![-1.1, 5.1, 3.1, 0.0]),
            record(6, vec![9.0, -9.0, -9.0, -9.0]),
        ]
    }

    #[test]
    fn test_two_clusters_without_the_outlier() {
        let groups = find_similar_groups(&sample_records(), 0.3, 2);
        assert_eq!(groups.len(), 2);

        let mut memberships: Vec<Vec<i64>> = groups
            .iter()
            .map(|g| {
                let mut ids: Vec<i64> = g.members.iter().map(|(id, _)| *id).collect();
                ids.sort();
                ids
            })
            .collect();
        memberships.sort();
        assert_eq!(memberships, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_no_singleton_groups() {
        let groups = find_similar_groups(&sample_records(), 0.3, 2);
        assert!(groups.iter().all(|g| g.members.len() >= 2));
    }

    #[test]
    fn test_deterministic_partition() {
        let records = sample_records();
        let first = find_similar_groups(&records, 0.3, 2);
        let second = find_similar_groups(&records, 0.3, 2);
        let as_sets = |groups: &[DiscoveredGroup]| -> Vec<Vec<i64>> {
            let mut sets: Vec<Vec<i64>> = groups
                .iter()
                .map(|g| {
                    let mut ids: Vec<i64> = g.members.iter().map(|(id, _)| *id).collect();
                    ids.sort();
                    ids
                })
                .collect();
            sets.sort();
            sets
        };
        assert_eq!(as_sets(&first), as_sets(&second));
    }

    #[test]
    fn test_too_few_records_yield_nothing() {
        assert!(find_similar_groups(&[], 0.3, 2).is_empty());
        assert!(find_similar_groups(&[record(1, vec![1.0, 2.0])], 0.3, 2).is_empty());
    }

    #[test]
    fn test_mismatched_dimensions_yield_nothing() {
        let records = vec![record(1, vec![1.0, 2.0]), record(2, vec![1.0])];
        assert!(find_similar_groups(&records, 0.3, 2).is_empty());
    }

    #[test]
    fn test_group_score_in_similarity_range() {
        let groups = find_similar_groups(&sample_records(), 0.3, 2);
        for group in groups {
            assert!(group.similarity_score > 0.0);
            assert!(group.similarity_score <= 1.0 + 1e-5);
        }
    }
}
