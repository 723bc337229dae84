//! Approval state machine.
//!
//! `pending -> {manager_approved, rejected, revision}` by a manager, then
//! `manager_approved -> {director_approved, rejected, revision}` by a director.
//! Every other status is terminal. [`plan_transition`] decides whether a review is
//! allowed; [`apply_transition`] persists it together with its notifications.

use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Letter, LetterStatus, NotificationKind, Role};
use crate::notifications::{notify_users, user_ids_with_role};
use crate::schema::letters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    Revision,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Revision => "revision",
        }
    }
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            "revision" => Ok(ReviewAction::Revision),
            other => Err(format!(
                "invalid action '{other}'. Allowed actions: approve, reject, revision"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Manager,
    Director,
}

impl Stage {
    pub fn for_role(role: Role) -> Option<Stage> {
        match role {
            Role::Manager => Some(Stage::Manager),
            Role::Director => Some(Stage::Director),
            Role::Admin => None,
        }
    }

    pub fn role(self) -> Role {
        match self {
            Stage::Manager => Role::Manager,
            Stage::Director => Role::Director,
        }
    }

    /// Status a letter must be in for this stage to act on it.
    pub fn expected_status(self) -> LetterStatus {
        match self {
            Stage::Manager => LetterStatus::Pending,
            Stage::Director => LetterStatus::ManagerApproved,
        }
    }

    fn approved_status(self) -> LetterStatus {
        match self {
            Stage::Manager => LetterStatus::ManagerApproved,
            Stage::Director => LetterStatus::DirectorApproved,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role().as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("role '{role}' cannot review letters")]
    RoleNotAllowed { role: Role },
    #[error("letter is '{current}' and cannot be reviewed by the {stage}")]
    InvalidState { current: String, stage: Stage },
    #[error("notes are required to reject a letter or request a revision")]
    NotesRequired,
    #[error("upload a digital signature before approving letters")]
    SignatureRequired,
    #[error("letter was already processed by another reviewer")]
    AlreadyProcessed,
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub stage: Stage,
    pub action: ReviewAction,
    pub from: LetterStatus,
    pub to: LetterStatus,
    pub notes: Option<String>,
}

impl Transition {
    pub fn notification_kind(&self) -> NotificationKind {
        match self.action {
            ReviewAction::Approve => NotificationKind::Approval,
            ReviewAction::Reject => NotificationKind::Rejection,
            ReviewAction::Revision => NotificationKind::Revision,
        }
    }

    /// Activity log action name, e.g. `letter_approve_manager`.
    pub fn activity_action(&self) -> String {
        format!("letter_{}_{}", self.action.as_str(), self.stage)
    }

    pub fn is_final_approval(&self) -> bool {
        self.to == LetterStatus::DirectorApproved
    }
}

/// Validates a review without touching storage. Checks run in order: role,
/// current status, then the action's own requirement (notes or signature).
pub fn plan_transition(
    current: &str,
    role: Role,
    action: ReviewAction,
    notes: Option<&str>,
    has_signature: bool,
) -> Result<Transition, WorkflowError> {
    let stage = Stage::for_role(role).ok_or(WorkflowError::RoleNotAllowed { role })?;
    let from = stage.expected_status();
    if current != from.as_str() {
        return Err(WorkflowError::InvalidState {
            current: current.to_string(),
            stage,
        });
    }

    let notes = notes
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned);

    let to = match action {
        ReviewAction::Approve => {
            if !has_signature {
                return Err(WorkflowError::SignatureRequired);
            }
            stage.approved_status()
        }
        ReviewAction::Reject | ReviewAction::Revision => {
            if notes.is_none() {
                return Err(WorkflowError::NotesRequired);
            }
            if action == ReviewAction::Reject {
                LetterStatus::Rejected
            } else {
                LetterStatus::Revision
            }
        }
    };

    Ok(Transition {
        stage,
        action,
        from,
        to,
        notes,
    })
}

pub struct Actor<'a> {
    pub id: Uuid,
    pub full_name: &'a str,
}

/// Human-readable inbox message for a transition.
pub fn notification_message(
    transition: &Transition,
    letter_number: &str,
    reviewer_name: &str,
) -> String {
    let title = transition.stage.role().title();
    match transition.action {
        ReviewAction::Approve => format!("Surat {letter_number} disetujui oleh {title} {reviewer_name}"),
        ReviewAction::Reject => format!("Surat {letter_number} ditolak oleh {title} {reviewer_name}"),
        ReviewAction::Revision => {
            format!("Surat {letter_number} perlu revisi menurut {title} {reviewer_name}")
        }
    }
}

/// Persists a planned transition. The status update only matches while the letter
/// is still in `transition.from`; a concurrent review that got there first turns
/// this call into [`WorkflowError::AlreadyProcessed`] and nothing is written.
pub fn apply_transition(
    conn: &mut PgConnection,
    letter: &Letter,
    reviewer: &Actor<'_>,
    transition: &Transition,
    final_letter_path: Option<&str>,
    now: NaiveDateTime,
) -> Result<Letter, WorkflowError> {
    conn.transaction::<_, WorkflowError, _>(|conn| {
        let target = letters::table
            .filter(letters::id.eq(letter.id))
            .filter(letters::status.eq(transition.from.as_str()));

        let updated: Option<Letter> = match transition.stage {
            Stage::Manager => diesel::update(target)
                .set((
                    letters::status.eq(transition.to.as_str()),
                    letters::manager_action_by.eq(Some(reviewer.id)),
                    letters::manager_action_at.eq(Some(now)),
                    letters::manager_notes.eq(transition.notes.as_deref()),
                    letters::updated_at.eq(now),
                ))
                .get_result(conn)
                .optional()?,
            Stage::Director => diesel::update(target)
                .set((
                    letters::status.eq(transition.to.as_str()),
                    letters::director_action_by.eq(Some(reviewer.id)),
                    letters::director_action_at.eq(Some(now)),
                    letters::director_notes.eq(transition.notes.as_deref()),
                    letters::final_letter_path.eq(final_letter_path),
                    letters::updated_at.eq(now),
                ))
                .get_result(conn)
                .optional()?,
        };
        let updated = updated.ok_or(WorkflowError::AlreadyProcessed)?;

        let kind = transition.notification_kind();
        let admins = user_ids_with_role(conn, Role::Admin)?;
        let admin_message =
            notification_message(transition, &updated.letter_number, reviewer.full_name);

        match (transition.stage, transition.action) {
            (Stage::Manager, ReviewAction::Approve) => {
                let directors = user_ids_with_role(conn, Role::Director)?;
                let director_message = format!(
                    "Surat {} telah disetujui Manager dan menunggu persetujuan Direktur",
                    updated.letter_number
                );
                notify_users(conn, &directors, Some(updated.id), &director_message, kind)?;
                notify_users(conn, &admins, Some(updated.id), &admin_message, kind)?;
            }
            (Stage::Director, ReviewAction::Reject | ReviewAction::Revision) => {
                notify_users(conn, &admins, Some(updated.id), &admin_message, kind)?;
                if let Some(manager_id) = updated.manager_action_by {
                    if !admins.contains(&manager_id) {
                        notify_users(conn, &[manager_id], Some(updated.id), &admin_message, kind)?;
                    }
                }
            }
            _ => {
                notify_users(conn, &admins, Some(updated.id), &admin_message, kind)?;
            }
        }

        Ok(updated)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_approves_pending_letter_with_signature() {
        let transition =
            plan_transition("pending", Role::Manager, ReviewAction::Approve, Some("  "), true)
                .unwrap();
        assert_eq!(transition.to, LetterStatus::ManagerApproved);
        assert_eq!(transition.notes, None);
        assert_eq!(transition.activity_action(), "letter_approve_manager");
        assert!(!transition.is_final_approval());
    }

    #[test]
    fn director_approval_is_final() {
        let transition = plan_transition(
            "manager_approved",
            Role::Director,
            ReviewAction::Approve,
            Some("Lanjutkan"),
            true,
        )
        .unwrap();
        assert_eq!(transition.to, LetterStatus::DirectorApproved);
        assert_eq!(transition.notes.as_deref(), Some("Lanjutkan"));
        assert!(transition.is_final_approval());
    }

    #[test]
    fn director_cannot_skip_manager_review() {
        let err = plan_transition("pending", Role::Director, ReviewAction::Approve, None, true)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState { .. }));
    }

    #[test]
    fn terminal_statuses_accept_no_review() {
        for status in ["director_approved", "rejected", "revision"] {
            for role in [Role::Manager, Role::Director] {
                let err = plan_transition(status, role, ReviewAction::Reject, Some("x"), true)
                    .unwrap_err();
                assert!(matches!(err, WorkflowError::InvalidState { .. }), "{status}");
            }
        }
    }

    #[test]
    fn approval_requires_signature() {
        let err = plan_transition("pending", Role::Manager, ReviewAction::Approve, None, false)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SignatureRequired));
    }

    #[test]
    fn reject_and_revision_require_notes() {
        for action in [ReviewAction::Reject, ReviewAction::Revision] {
            let err = plan_transition("manager_approved", Role::Director, action, Some(" \n"), true)
                .unwrap_err();
            assert!(matches!(err, WorkflowError::NotesRequired));
        }
        let transition = plan_transition(
            "pending",
            Role::Manager,
            ReviewAction::Revision,
            Some(" Lengkapi alamat "),
            false,
        )
        .unwrap();
        assert_eq!(transition.to, LetterStatus::Revision);
        assert_eq!(transition.notes.as_deref(), Some("Lengkapi alamat"));
        assert_eq!(transition.notification_kind(), NotificationKind::Revision);
    }

    #[test]
    fn admins_cannot_review() {
        let err = plan_transition("pending", Role::Admin, ReviewAction::Approve, None, true)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RoleNotAllowed { role: Role::Admin }));
    }

    #[test]
    fn parses_actions() {
        assert_eq!("reject".parse::<ReviewAction>().unwrap(), ReviewAction::Reject);
        assert!("approved".parse::<ReviewAction>().is_err());
    }

    #[test]
    fn messages_name_the_reviewer() {
        let transition =
            plan_transition("pending", Role::Manager, ReviewAction::Reject, Some("x"), true)
                .unwrap();
        assert_eq!(
            notification_message(&transition, "SRT-20240101-0001", "Budi"),
            "Surat SRT-20240101-0001 ditolak oleh Manager Budi"
        );
    }
}
