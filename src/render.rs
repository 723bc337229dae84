//! Letter rendering: placeholder substitution, Indonesian dates, the final letter
//! document, and the public tracking timeline.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::models::{Letter, LetterStatus};

pub const LETTER_DATE_FIELD: &str = "tanggal_surat";

const INDONESIAN_MONTHS: [&str; 12] = [
    "Januari",
    "Februari",
    "Maret",
    "April",
    "Mei",
    "Juni",
    "Juli",
    "Agustus",
    "September",
    "Oktober",
    "November",
    "Desember",
];

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"));

fn month_name(month: u32) -> &'static str {
    INDONESIAN_MONTHS[(month as usize).saturating_sub(1) % 12]
}

/// `17 Agustus 2024`
pub fn format_indonesian_date(date: NaiveDate) -> String {
    format!("{} {} {}", date.day(), month_name(date.month()), date.year())
}

/// `07 Januari 2024 09:05`
pub fn format_datetime(value: NaiveDateTime) -> String {
    format!(
        "{:02} {} {} {:02}:{:02}",
        value.day(),
        month_name(value.month()),
        value.year(),
        value.hour(),
        value.minute()
    )
}

/// Shifts a stored UTC timestamp into the application offset.
pub fn to_local(utc: NaiveDateTime, offset: FixedOffset) -> NaiveDateTime {
    offset.from_utc_datetime(&utc).naive_local()
}

/// Substitutes `{key}` tokens in a single pass. Unknown tokens are left as they are
/// and `{tanggal_surat}` always becomes `today`.
pub fn render_with_date(
    template_content: &str,
    fields: &BTreeMap<String, String>,
    today: NaiveDate,
) -> String {
    let letter_date = format_indonesian_date(today);
    PLACEHOLDER
        .replace_all(template_content, |caps: &Captures| {
            let key = &caps[1];
            if key == LETTER_DATE_FIELD {
                return letter_date.clone();
            }
            match fields.get(key) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Keys of every placeholder token in `template_content`, in order of first use.
pub fn placeholder_keys(template_content: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template_content) {
        let key = &caps[1];
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

pub fn is_valid_field_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub struct SignatureImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct SignatureBlock {
    pub title: &'static str,
    pub name: String,
    pub signed_at: Option<NaiveDateTime>,
    pub image: Option<SignatureImage>,
}

pub struct FinalLetter<'a> {
    pub letter_number: &'a str,
    pub template_name: &'a str,
    pub body: &'a str,
    pub signatures: Vec<SignatureBlock>,
}

/// Standalone HTML document for an approved letter. `body` is plain text and is
/// escaped; line breaks are kept.
pub fn render_final_letter(letter: &FinalLetter<'_>) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"id\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!(
        "<title>{} - {}</title>\n",
        escape_html(letter.template_name),
        escape_html(letter.letter_number)
    ));
    html.push_str(
        "<style>\
         body{font-family:'Times New Roman',serif;max-width:800px;margin:40px auto;line-height:1.6}\
         .letter-number{text-align:right;font-weight:bold}\
         .letter-body{white-space:pre-wrap;margin:32px 0}\
         .signatures{display:flex;justify-content:space-between;margin-top:48px}\
         .signature{text-align:center;min-width:220px}\
         .signature img{max-height:90px;max-width:200px}\
         </style>\n</head>\n<body>\n",
    );
    html.push_str(&format!(
        "<div class=\"letter-number\">Nomor: {}</div>\n",
        escape_html(letter.letter_number)
    ));
    html.push_str(&format!(
        "<div class=\"letter-body\">{}</div>\n",
        escape_html(letter.body)
    ));

    html.push_str("<div class=\"signatures\">\n");
    for block in &letter.signatures {
        html.push_str("<div class=\"signature\">\n");
        html.push_str(&format!("<div>{}</div>\n", escape_html(block.title)));
        if let Some(image) = &block.image {
            html.push_str(&format!(
                "<img src=\"data:{};base64,{}\" alt=\"Tanda tangan {}\">\n",
                escape_html(&image.content_type),
                BASE64.encode(&image.bytes),
                escape_html(&block.name)
            ));
        }
        html.push_str(&format!("<div><strong>{}</strong></div>\n", escape_html(&block.name)));
        if let Some(signed_at) = block.signed_at {
            html.push_str(&format!("<div>{}</div>\n", format_datetime(signed_at)));
        }
        html.push_str("</div>\n");
    }
    html.push_str("</div>\n</body>\n</html>\n");
    html
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Completed,
    Current,
    Rejected,
    Revision,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineStep {
    pub key: &'static str,
    pub title: &'static str,
    pub date: Option<String>,
    pub description: String,
    pub state: StepState,
}

/// Approval progress as shown to the submitter. Dates are shifted into `offset`.
pub fn timeline(letter: &Letter, offset: FixedOffset) -> Vec<TimelineStep> {
    let status = letter.status().unwrap_or(LetterStatus::Pending);
    let local = |value: Option<NaiveDateTime>| value.map(|at| format_datetime(to_local(at, offset)));
    let mut steps = vec![TimelineStep {
        key: "submitted",
        title: "Surat Diajukan",
        date: local(Some(letter.created_at)),
        description: "Surat berhasil diajukan ke sistem".to_string(),
        state: StepState::Completed,
    }];

    if status == LetterStatus::Pending {
        steps.push(TimelineStep {
            key: "manager_review",
            title: "Menunggu Persetujuan Manager",
            date: None,
            description: "Surat sedang menunggu review dari Manager".to_string(),
            state: StepState::Current,
        });
        return steps;
    }

    let decided_by_manager = letter.director_action_at.is_none();
    let manager_default = match status {
        LetterStatus::Rejected if decided_by_manager => "Ditolak oleh Manager",
        LetterStatus::Revision if decided_by_manager => "Revisi diminta oleh Manager",
        _ => "Disetujui oleh Manager",
    };
    steps.push(TimelineStep {
        key: "manager_review",
        title: "Review Manager",
        date: local(letter.manager_action_at),
        description: non_empty(letter.manager_notes.as_deref()).unwrap_or(manager_default).to_string(),
        state: StepState::Completed,
    });

    if status == LetterStatus::ManagerApproved {
        steps.push(TimelineStep {
            key: "director_review",
            title: "Menunggu Persetujuan Direktur",
            date: None,
            description: "Surat sedang menunggu review dari Direktur".to_string(),
            state: StepState::Current,
        });
        return steps;
    }

    if letter.director_action_at.is_some() {
        let director_default = match status {
            LetterStatus::DirectorApproved => "Disetujui oleh Direktur",
            LetterStatus::Revision => "Revisi diminta oleh Direktur",
            _ => "Ditolak oleh Direktur",
        };
        steps.push(TimelineStep {
            key: "director_review",
            title: "Review Direktur",
            date: local(letter.director_action_at),
            description: non_empty(letter.director_notes.as_deref())
                .unwrap_or(director_default)
                .to_string(),
            state: StepState::Completed,
        });
    }

    let decided_at = local(letter.director_action_at.or(letter.manager_action_at));
    match status {
        LetterStatus::DirectorApproved => steps.push(TimelineStep {
            key: "completed",
            title: "Surat Selesai",
            date: decided_at,
            description: "Surat telah disetujui dan dapat diunduh".to_string(),
            state: StepState::Completed,
        }),
        LetterStatus::Rejected => steps.push(TimelineStep {
            key: "rejected",
            title: "Surat Ditolak",
            date: decided_at,
            description: "Surat ditolak. Silakan ajukan surat baru dengan perbaikan.".to_string(),
            state: StepState::Rejected,
        }),
        LetterStatus::Revision => steps.push(TimelineStep {
            key: "revision",
            title: "Perlu Revisi",
            date: decided_at,
            description: "Surat perlu diperbaiki. Silakan ajukan surat baru dengan perbaikan."
                .to_string(),
            state: StepState::Revision,
        }),
        LetterStatus::Pending | LetterStatus::ManagerApproved => {}
    }

    steps
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        day(y, m, d).and_hms_opt(h, min, 0).unwrap()
    }

    fn letter(status: LetterStatus) -> Letter {
        Letter {
            id: Uuid::new_v4(),
            letter_number: "SRT-20240101-0001".into(),
            template_id: Uuid::new_v4(),
            submitter_name: "Budi".into(),
            submitter_email: "budi@example.com".into(),
            submitter_phone: None,
            letter_data: json!({}),
            status: status.as_str().into(),
            manager_action_by: None,
            manager_action_at: None,
            manager_notes: None,
            director_action_by: None,
            director_action_at: None,
            director_notes: None,
            final_letter_path: None,
            created_at: at(2024, 1, 1, 2, 0),
            updated_at: at(2024, 1, 1, 2, 0),
        }
    }

    #[test]
    fn substitutes_known_placeholders() {
        let rendered = render_with_date(
            "Dear {nama}, your visit to {tempat} on {tanggal_acara} is confirmed.",
            &fields(&[
                ("nama", "Budi"),
                ("tempat", "Jakarta"),
                ("tanggal_acara", "2024-01-01"),
            ]),
            day(2024, 5, 2),
        );
        assert_eq!(
            rendered,
            "Dear Budi, your visit to Jakarta on 2024-01-01 is confirmed."
        );
    }

    #[test]
    fn letter_date_always_uses_today() {
        let rendered = render_with_date(
            "Jakarta, {tanggal_surat}",
            &fields(&[("tanggal_surat", "kemarin")]),
            day(2024, 8, 17),
        );
        assert_eq!(rendered, "Jakarta, 17 Agustus 2024");
    }

    #[test]
    fn unknown_tokens_stay_verbatim() {
        let rendered = render_with_date("{nama} {alamat} {not a token}", &fields(&[("nama", "Sari")]), day(2024, 1, 1));
        assert_eq!(rendered, "Sari {alamat} {not a token}");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let rendered = render_with_date(
            "{a}",
            &fields(&[("a", "{b}"), ("b", "nested")]),
            day(2024, 1, 1),
        );
        assert_eq!(rendered, "{b}");
    }

    #[test]
    fn formats_indonesian_dates() {
        assert_eq!(format_indonesian_date(day(2024, 12, 5)), "5 Desember 2024");
        assert_eq!(format_datetime(at(2024, 3, 7, 9, 5)), "07 Maret 2024 09:05");
    }

    #[test]
    fn collects_placeholder_keys_once() {
        assert_eq!(
            placeholder_keys("{nama} dan {tempat}, {nama}"),
            vec!["nama".to_string(), "tempat".to_string()]
        );
        assert!(is_valid_field_key("tanggal_acara"));
        assert!(!is_valid_field_key("nama lengkap"));
        assert!(!is_valid_field_key(""));
    }

    #[test]
    fn final_letter_escapes_body_and_embeds_signatures() {
        let html = render_final_letter(&FinalLetter {
            letter_number: "SRT-20240101-0001",
            template_name: "Surat Keterangan",
            body: "Halo <b>Budi</b>",
            signatures: vec![SignatureBlock {
                title: "Direktur",
                name: "Dewi".into(),
                signed_at: Some(at(2024, 1, 2, 10, 0)),
                image: Some(SignatureImage {
                    content_type: "image/png".into(),
                    bytes: vec![1, 2, 3],
                }),
            }],
        });
        assert!(html.contains("Halo &lt;b&gt;Budi&lt;/b&gt;"));
        assert!(html.contains("data:image/png;base64,AQID"));
        assert!(html.contains("02 Januari 2024 10:00"));
    }

    #[test]
    fn pending_letter_waits_on_manager() {
        let steps = timeline(&letter(LetterStatus::Pending), FixedOffset::east_opt(7 * 3600).unwrap());
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].date.as_deref(), Some("01 Januari 2024 09:00"));
        assert_eq!(steps[1].state, StepState::Current);
    }

    #[test]
    fn director_rejection_shows_both_reviews() {
        let mut rejected = letter(LetterStatus::Rejected);
        rejected.manager_action_at = Some(at(2024, 1, 2, 1, 0));
        rejected.director_action_at = Some(at(2024, 1, 3, 1, 0));
        rejected.director_notes = Some("Anggaran tidak tersedia".into());

        let steps = timeline(&rejected, FixedOffset::east_opt(0).unwrap());
        let keys: Vec<_> = steps.iter().map(|step| step.key).collect();
        assert_eq!(
            keys,
            vec!["submitted", "manager_review", "director_review", "rejected"]
        );
        assert_eq!(steps[1].description, "Disetujui oleh Manager");
        assert_eq!(steps[2].description, "Anggaran tidak tersedia");
        assert_eq!(steps[3].state, StepState::Rejected);
        assert_eq!(steps[3].date.as_deref(), Some("03 Januari 2024 01:00"));
    }

    #[test]
    fn manager_revision_ends_the_timeline() {
        let mut revision = letter(LetterStatus::Revision);
        revision.manager_action_at = Some(at(2024, 1, 2, 1, 0));
        let steps = timeline(&revision, FixedOffset::east_opt(0).unwrap());
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].description, "Revisi diminta oleh Manager");
        assert_eq!(steps[2].state, StepState::Revision);
    }
}
