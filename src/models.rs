use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Director,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Manager, Role::Director];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Director => "director",
        }
    }

    /// Display title used on rendered letters and dashboards.
    pub fn title(self) -> &'static str {
        match self {
            Role::Admin => "Administrator",
            Role::Manager => "Manager",
            Role::Director => "Direktur",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "director" => Ok(Role::Director),
            other => Err(format!(
                "invalid role '{other}'. Allowed roles: admin, manager, director"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterStatus {
    Pending,
    ManagerApproved,
    DirectorApproved,
    Rejected,
    Revision,
}

impl LetterStatus {
    pub const ALL: [LetterStatus; 5] = [
        LetterStatus::Pending,
        LetterStatus::ManagerApproved,
        LetterStatus::DirectorApproved,
        LetterStatus::Rejected,
        LetterStatus::Revision,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LetterStatus::Pending => "pending",
            LetterStatus::ManagerApproved => "manager_approved",
            LetterStatus::DirectorApproved => "director_approved",
            LetterStatus::Rejected => "rejected",
            LetterStatus::Revision => "revision",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LetterStatus::Pending => "Menunggu Persetujuan Manager",
            LetterStatus::ManagerApproved => "Menunggu Persetujuan Direktur",
            LetterStatus::DirectorApproved => "Disetujui - Surat Terbit",
            LetterStatus::Rejected => "Ditolak",
            LetterStatus::Revision => "Perlu Revisi",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LetterStatus::DirectorApproved | LetterStatus::Rejected | LetterStatus::Revision
        )
    }
}

impl fmt::Display for LetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LetterStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LetterStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value.trim())
            .ok_or_else(|| format!("invalid letter status '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewSubmission,
    Approval,
    Rejection,
    Revision,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::NewSubmission => "new_submission",
            NotificationKind::Approval => "approval",
            NotificationKind::Rejection => "rejection",
            NotificationKind::Revision => "revision",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NotificationKind::NewSubmission => "Pengajuan Surat Baru",
            NotificationKind::Approval => "Surat Disetujui",
            NotificationKind::Rejection => "Surat Ditolak",
            NotificationKind::Revision => "Surat Perlu Revisi",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "new_submission" => Ok(NotificationKind::NewSubmission),
            "approval" => Ok(NotificationKind::Approval),
            "rejection" => Ok(NotificationKind::Rejection),
            "revision" => Ok(NotificationKind::Revision),
            other => Err(format!("invalid notification type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub full_name: String,
    pub digital_signature_path: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sessions)]
#[diesel(belongs_to(User))]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
    pub last_activity_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
    pub last_activity_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = templates)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub template_content: String,
    pub fields_required: Value,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Template {
    /// Required field keys in declaration order. Non-string entries are skipped.
    pub fn field_keys(&self) -> Vec<String> {
        match &self.fields_required {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = templates)]
pub struct NewTemplate {
    pub id: Uuid,
    pub name: String,
    pub template_content: String,
    pub fields_required: Value,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = letters)]
#[diesel(belongs_to(Template))]
pub struct Letter {
    pub id: Uuid,
    pub letter_number: String,
    pub template_id: Uuid,
    pub submitter_name: String,
    pub submitter_email: String,
    pub submitter_phone: Option<String>,
    pub letter_data: Value,
    pub status: String,
    pub manager_action_by: Option<Uuid>,
    pub manager_action_at: Option<NaiveDateTime>,
    pub manager_notes: Option<String>,
    pub director_action_by: Option<Uuid>,
    pub director_action_at: Option<NaiveDateTime>,
    pub director_notes: Option<String>,
    pub final_letter_path: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Letter {
    pub fn status(&self) -> Option<LetterStatus> {
        self.status.parse().ok()
    }

    /// Field values keyed by template field. Non-string JSON values are stringified.
    pub fn field_map(&self) -> BTreeMap<String, String> {
        match &self.letter_data {
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), text)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = letters)]
pub struct NewLetter {
    pub id: Uuid,
    pub letter_number: String,
    pub template_id: Uuid,
    pub submitter_name: String,
    pub submitter_email: String,
    pub submitter_phone: Option<String>,
    pub letter_data: Value,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = letter_sequences)]
#[diesel(primary_key(day))]
pub struct LetterSequence {
    pub day: NaiveDate,
    pub last_value: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub letter_id: Option<Uuid>,
    pub message: String,
    #[diesel(column_name = type_)]
    pub kind: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub letter_id: Option<Uuid>,
    pub message: String,
    #[diesel(column_name = type_)]
    pub kind: String,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = login_attempts)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub username: String,
    pub success: bool,
    pub ip_address: Option<String>,
    pub attempted_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = login_attempts)]
pub struct NewLoginAttempt {
    pub id: Uuid,
    pub username: String,
    pub success: bool,
    pub ip_address: Option<String>,
    pub attempted_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = activity_logs)]
pub struct NewActivityLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Director".parse::<Role>().unwrap(), Role::Director);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in LetterStatus::ALL {
            assert_eq!(status.as_str().parse::<LetterStatus>().unwrap(), status);
        }
        assert!("approved".parse::<LetterStatus>().is_err());
    }

    #[test]
    fn only_pending_and_manager_approved_are_open() {
        let open: Vec<_> = LetterStatus::ALL
            .into_iter()
            .filter(|status| !status.is_terminal())
            .collect();
        assert_eq!(
            open,
            vec![LetterStatus::Pending, LetterStatus::ManagerApproved]
        );
    }
}
