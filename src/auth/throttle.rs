use chrono::{Duration, NaiveDateTime};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use uuid::Uuid;

use crate::models::NewLoginAttempt;
use crate::schema::login_attempts;

pub const MAX_FAILED_ATTEMPTS: i64 = 5;
pub const ATTEMPT_WINDOW_MINUTES: i64 = 15;
pub const ATTEMPT_RETENTION_HOURS: i64 = 24;

pub fn is_locked_out(failed_attempts_in_window: i64) -> bool {
    failed_attempts_in_window >= MAX_FAILED_ATTEMPTS
}

pub fn failed_attempts_in_window(
    conn: &mut PgConnection,
    username: &str,
    now: NaiveDateTime,
) -> QueryResult<i64> {
    let window_start = now - Duration::minutes(ATTEMPT_WINDOW_MINUTES);
    login_attempts::table
        .filter(login_attempts::username.eq(username))
        .filter(login_attempts::success.eq(false))
        .filter(login_attempts::attempted_at.gt(window_start))
        .select(count_star())
        .first(conn)
}

pub fn record_attempt(
    conn: &mut PgConnection,
    username: &str,
    success: bool,
    ip_address: Option<String>,
    now: NaiveDateTime,
) -> QueryResult<()> {
    let attempt = NewLoginAttempt {
        id: Uuid::new_v4(),
        username: username.to_owned(),
        success,
        ip_address,
        attempted_at: now,
    };
    diesel::insert_into(login_attempts::table)
        .values(&attempt)
        .execute(conn)?;
    Ok(())
}

pub fn prune_attempts(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
    let cutoff = now - Duration::hours(ATTEMPT_RETENTION_HOURS);
    diesel::delete(login_attempts::table.filter(login_attempts::attempted_at.lt(cutoff)))
        .execute(conn)
}
