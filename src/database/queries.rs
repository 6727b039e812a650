//! # Database Queries Module
//!
//! This module centralizes all database queries used by Reviewgate.
//! It provides well-named functions for each database operation, making it easier to
//! maintain and reuse queries across the reporting store and the CLI.
//!
//! ## Query Categories
//!
//! - **Abuse Report Queries**: Atomic upsert and read access for abuse reports
//! - **General Queries**: Counts used by operational tooling

use sqlx::sqlite::{SqlitePool, SqliteQueryResult, SqliteRow};

///////////////////////////////////////////////////////////////////////////////
//****                      Abuse Report Queries                         ****//
///////////////////////////////////////////////////////////////////////////////

/// Insert a new abuse report or bump the counter of an existing one.
///
/// A single `INSERT ... ON CONFLICT` statement, so two concurrent first violations
/// for the same anonymized id can never produce two rows. `last_attempt` only moves
/// forward; RFC 3339 UTC strings order chronologically.
pub async fn upsert_abuse_report(
    pool: &SqlitePool,
    anonymized_id: &str,
    coarse_address: &str,
    target_product_id: i64,
    target_button_id: i64,
    initial_attempts: i64,
    attempt_at: &str,
) -> Result<SqliteQueryResult, sqlx::Error> {
    sqlx::query(
        "INSERT INTO abuse_reports
        (anonymized_id, coarse_address, target_product_id, target_button_id, total_attempts, first_attempt, last_attempt)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(anonymized_id) DO UPDATE SET
            total_attempts = abuse_reports.total_attempts + 1,
            last_attempt = max(abuse_reports.last_attempt, excluded.last_attempt)"
    )
    .bind(anonymized_id)
    .bind(coarse_address)
    .bind(target_product_id)
    .bind(target_button_id)
    .bind(initial_attempts)
    .bind(attempt_at)
    .bind(attempt_at)
    .execute(pool)
    .await
}

/// Fetch a single abuse report by anonymized id
pub async fn fetch_abuse_report_by_id(
    pool: &SqlitePool,
    anonymized_id: &str,
) -> Result<Option<SqliteRow>, sqlx::Error> {
    sqlx::query(
        "SELECT anonymized_id, coarse_address, target_product_id, target_button_id, total_attempts, first_attempt, last_attempt
        FROM abuse_reports WHERE anonymized_id = ?"
    )
    .bind(anonymized_id)
    .fetch_optional(pool)
    .await
}

/// Fetch the most recently active abuse reports
pub async fn fetch_recent_abuse_reports(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<SqliteRow>, sqlx::Error> {
    sqlx::query(
        "SELECT anonymized_id, coarse_address, target_product_id, target_button_id, total_attempts, first_attempt, last_attempt
        FROM abuse_reports ORDER BY last_attempt DESC LIMIT ?"
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

///////////////////////////////////////////////////////////////////////////////
//****                         General Queries                           ****//
///////////////////////////////////////////////////////////////////////////////

/// Count all abuse reports
pub async fn count_abuse_reports(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM abuse_reports")
        .fetch_one(pool)
        .await
}
