use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::models::{NewNotification, NotificationKind, Role};
use crate::schema::{notifications, users};

pub fn user_ids_with_role(conn: &mut PgConnection, role: Role) -> QueryResult<Vec<Uuid>> {
    users::table
        .filter(users::role.eq(role.as_str()))
        .select(users::id)
        .order(users::created_at.asc())
        .load(conn)
}

/// Inserts one notification per recipient. Duplicate recipients get a single row.
pub fn notify_users(
    conn: &mut PgConnection,
    recipients: &[Uuid],
    letter_id: Option<Uuid>,
    message: &str,
    kind: NotificationKind,
) -> QueryResult<usize> {
    let mut seen: Vec<Uuid> = Vec::with_capacity(recipients.len());
    for id in recipients {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    if seen.is_empty() {
        return Ok(0);
    }

    let rows: Vec<NewNotification> = seen
        .into_iter()
        .map(|user_id| NewNotification {
            id: Uuid::new_v4(),
            user_id,
            letter_id,
            message: message.to_owned(),
            kind: kind.as_str().to_owned(),
        })
        .collect();

    diesel::insert_into(notifications::table)
        .values(&rows)
        .execute(conn)
}

pub fn unread_count(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<i64> {
    notifications::table
        .filter(notifications::user_id.eq(user_id))
        .filter(notifications::is_read.eq(false))
        .count()
        .get_result(conn)
}
