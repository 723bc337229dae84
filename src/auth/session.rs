//! Server-side sessions. The access token names a session; the session row decides
//! whether the token is still usable.

use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::models::{NewSession, Session};
use crate::schema::sessions;

pub fn create_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: NaiveDateTime,
) -> QueryResult<Session> {
    let new_session = NewSession {
        id: Uuid::new_v4(),
        user_id,
        created_at: now,
        last_activity_at: now,
    };

    diesel::insert_into(sessions::table)
        .values(&new_session)
        .get_result(conn)
}

/// Refreshes the activity timestamp of a live session. Returns `false` when the
/// session is unknown, revoked, belongs to another user, or has been idle longer
/// than `timeout`.
pub fn touch_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    user_id: Uuid,
    timeout: Duration,
    now: NaiveDateTime,
) -> QueryResult<bool> {
    let idle_cutoff = now - timeout;
    let updated = diesel::update(
        sessions::table
            .filter(sessions::id.eq(session_id))
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::revoked_at.is_null())
            .filter(sessions::last_activity_at.gt(idle_cutoff)),
    )
    .set(sessions::last_activity_at.eq(now))
    .execute(conn)?;

    Ok(updated == 1)
}

pub fn revoke_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    diesel::update(
        sessions::table
            .filter(sessions::id.eq(session_id))
            .filter(sessions::revoked_at.is_null()),
    )
    .set(sessions::revoked_at.eq(now))
    .execute(conn)
}

pub fn revoke_user_sessions(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: NaiveDateTime,
) -> QueryResult<usize> {
    diesel::update(
        sessions::table
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::revoked_at.is_null()),
    )
    .set(sessions::revoked_at.eq(now))
    .execute(conn)
}

/// Deletes revoked sessions and sessions idle since before `idle_cutoff`.
pub fn prune_sessions(conn: &mut PgConnection, idle_cutoff: NaiveDateTime) -> QueryResult<usize> {
    diesel::delete(
        sessions::table.filter(
            sessions::revoked_at
                .is_not_null()
                .or(sessions::last_activity_at.lt(idle_cutoff)),
        ),
    )
    .execute(conn)
}
