use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::error::TrialMatchError;
use crate::matching::detail::MatchReport;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn truncate_utf8(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    if max_bytes == 0 {
        return "…".to_string();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let mut out = s[..boundary].trim_end().to_string();
    out.push('…');
    out
}

/// Flattens a value so it fits in one Markdown table cell.
fn table_cell(s: String) -> String {
    let flat = s
        .replace(['\n', '\r', '\t'], " ")
        .replace('|', "\\|")
        .trim()
        .to_string();
    if flat.is_empty() { "-".to_string() } else { flat }
}

fn env() -> Result<&'static Environment<'static>, TrialMatchError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", truncate_utf8);
    env.add_filter("cell", table_cell);
    env.add_template(
        "matches.md.j2",
        include_str!("../../templates/matches.md.j2"),
    )?;

    let _ = ENV.set(env);
    ENV.get().ok_or_else(|| TrialMatchError::Api {
        api: "render".into(),
        message: "Template environment initialization failed".into(),
    })
}

/// Renders the ranked table; `show_details` appends per-trial explanation,
/// intervention and location sections.
pub fn matches_markdown(
    report: &MatchReport,
    patient_id: Option<&str>,
    show_details: bool,
) -> Result<String, TrialMatchError> {
    let tmpl = env()?.get_template("matches.md.j2")?;
    let body = tmpl.render(context! {
        report => report,
        patient_id => patient_id,
        show_details => show_details,
    })?;
    Ok(body)
}
