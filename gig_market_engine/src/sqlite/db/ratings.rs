use sqlx::SqliteConnection;

use crate::{
    db_types::{NewRating, Rating},
    traits::MarketplaceError,
};

/// Whether `rater_id` has already rated `job_id`. At most one rating per (job, rater) pair.
pub async fn exists(job_id: i64, rater_id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE job_id = $1 AND rater_id = $2")
        .bind(job_id)
        .bind(rater_id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

pub async fn insert(rating: NewRating, conn: &mut SqliteConnection) -> Result<Rating, MarketplaceError> {
    let rating = sqlx::query_as(
        r#"
            INSERT INTO ratings (job_id, rater_id, ratee_id, score, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(rating.job_id)
    .bind(rating.rater_id)
    .bind(rating.ratee_id)
    .bind(rating.score)
    .bind(rating.comment)
    .fetch_one(conn)
    .await?;
    Ok(rating)
}
