//! Incremental reputation aggregation.
//!
//! A user's reputation is the arithmetic mean of all ratings they have received. Recomputing that from history
//! on every new rating would make rating application O(n), so the aggregate is maintained incrementally from
//! the stored `(score, count)` pair. Scores arrive validated to 1..=5, so the running mean stays within [0, 5]
//! by construction.

/// Fold one new rating into a user's `(score, count)` aggregate, returning the new pair.
///
/// The first rating sets the score directly; after that the update is the standard running mean
/// `score' = (score * count + r) / (count + 1)`.
pub fn apply_rating(score: f64, count: i64, rating: i64) -> (f64, i64) {
    if count <= 0 {
        return (rating as f64, 1);
    }
    let new_count = count + 1;
    let new_score = (score * count as f64 + rating as f64) / new_count as f64;
    (new_score, new_count)
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::*;

    fn naive_mean(ratings: &[i64]) -> f64 {
        ratings.iter().sum::<i64>() as f64 / ratings.len() as f64
    }

    #[test]
    fn first_rating_sets_the_score_directly() {
        assert_eq!(apply_rating(0.0, 0, 4), (4.0, 1));
        assert_eq!(apply_rating(3.5, -1, 2), (2.0, 1));
    }

    #[test]
    fn matches_a_naive_full_recompute() {
        let ratings = [5, 3, 4, 1, 5, 2];
        let (mut score, mut count) = (0.0, 0);
        for (i, r) in ratings.iter().enumerate() {
            (score, count) = apply_rating(score, count, *r);
            let expected = naive_mean(&ratings[..=i]);
            assert!((score - expected).abs() < 1e-9, "after {} ratings: {score} vs {expected}", i + 1);
        }
        assert_eq!(count, ratings.len() as i64);
    }

    #[test]
    fn random_sequences_stay_bounded_and_exact() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let n = rng.gen_range(1..50);
            let ratings = (0..n).map(|_| rng.gen_range(1..=5)).collect::<Vec<i64>>();
            let (mut score, mut count) = (0.0, 0);
            for r in &ratings {
                (score, count) = apply_rating(score, count, *r);
                assert!((0.0..=5.0).contains(&score), "score {score} escaped [0,5]");
            }
            let expected = naive_mean(&ratings);
            assert!((score - expected).abs() < 1e-9, "{score} vs naive {expected}");
        }
    }
}
