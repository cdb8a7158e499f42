use savor_core::DishRanking;

/// Merge per-shard candidates into one global ranking.
///
/// Sorts descending by score and keeps the first `limit`. The sort is
/// stable, so equal scores keep the order they were gathered in. Shards are
/// read with a bounded fetch before this step, which makes the result an
/// approximation when one shard holds more than that bound of the global
/// top entries.
pub fn merge_ranked(mut candidates: Vec<DishRanking>, limit: usize) -> Vec<DishRanking> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking(dish_id: i64, restaurant_id: i64, score: f64) -> DishRanking {
        DishRanking {
            dish_id,
            dish_name: format!("dish-{dish_id}"),
            restaurant_id,
            score,
            review_count: 0,
        }
    }

    #[test]
    fn test_merge_across_shards() {
        // Shard A: d1=9, d2=5. Shard B: d3=8.
        let candidates = vec![ranking(1, 10, 9.0), ranking(2, 10, 5.0), ranking(3, 20, 8.0)];
        let merged = merge_ranked(candidates, 2);

        let ids: Vec<_> = merged.iter().map(|r| r.dish_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(merged[0].score, 9.0);
        assert_eq!(merged[1].score, 8.0);
    }

    #[test]
    fn test_ties_keep_gather_order() {
        let candidates = vec![ranking(4, 1, 3.0), ranking(2, 2, 3.0), ranking(9, 3, 3.0)];
        let ids: Vec<_> = merge_ranked(candidates, 10)
            .iter()
            .map(|r| r.dish_id)
            .collect();
        assert_eq!(ids, vec![4, 2, 9]);
    }

    #[test]
    fn test_limit_zero_and_empty() {
        assert!(merge_ranked(vec![ranking(1, 1, 1.0)], 0).is_empty());
        assert!(merge_ranked(Vec::new(), 5).is_empty());
    }
}
