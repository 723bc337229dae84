use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::PgConnection;

use crate::schema::letter_sequences;

pub fn format_letter_number(prefix: &str, day: NaiveDate, sequence: i32) -> String {
    format!("{prefix}-{}-{sequence:04}", day.format("%Y%m%d"))
}

/// Claims the next sequence value for `day`. The counter row stays locked until the
/// surrounding transaction ends, so callers must insert the letter in the same
/// transaction.
pub fn next_sequence(conn: &mut PgConnection, day: NaiveDate) -> QueryResult<i32> {
    diesel::insert_into(letter_sequences::table)
        .values((
            letter_sequences::day.eq(day),
            letter_sequences::last_value.eq(1),
        ))
        .on_conflict(letter_sequences::day)
        .do_update()
        .set(letter_sequences::last_value.eq(letter_sequences::last_value + 1))
        .returning(letter_sequences::last_value)
        .get_result(conn)
}

pub fn next_letter_number(
    conn: &mut PgConnection,
    prefix: &str,
    day: NaiveDate,
) -> QueryResult<String> {
    let sequence = next_sequence(conn, day)?;
    Ok(format_letter_number(prefix, day, sequence))
}
