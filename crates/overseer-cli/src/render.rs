//! Plain-text rendering of reconciled state.

use chrono::{DateTime, Utc};
use overseer_state::{Action, Process, Reconciler, Session, StateChange};

const PREVIEW_CHARS: usize = 60;

pub(crate) fn session_line(session: &Session) -> String {
    let mut line = format!(
        "{:<8} {} model={} tokens={} last={}",
        session.status.as_str(),
        session.key,
        session.model.as_deref().unwrap_or("-"),
        session
            .total_tokens
            .map_or_else(|| "-".to_string(), |t| t.to_string()),
        session.last_activity.map_or_else(|| "-".to_string(), timestamp),
    );
    if let Some(ref parent) = session.parent_key {
        line.push_str(&format!(" parent={parent}"));
        if session.parent_inferred {
            line.push_str(" (inferred)");
        }
    }
    line
}

pub(crate) fn action_line(action: &Action) -> String {
    let mut line = format!(
        "action  {} {} session={}",
        action.id,
        action.kind.as_str(),
        action.session_key.as_deref().unwrap_or("?"),
    );
    if let Some(ref tool) = action.tool_name {
        line.push_str(&format!(" tool={tool}"));
    }
    if let Some(ref content) = action.content {
        line.push_str(&format!(" {:?}", preview(content)));
    }
    line
}

pub(crate) fn process_line(process: &Process) -> String {
    let state = match process.exit_code {
        Some(code) => format!("exited({code})"),
        None if process.is_running() => "running".to_string(),
        None => "exited".to_string(),
    };
    format!(
        "process {} {} cmd={} output={}{}",
        process.key,
        state,
        process.command.as_deref().unwrap_or("-"),
        process.output.total_chars(),
        if process.output.is_lossy() { " (truncated)" } else { "" },
    )
}

/// Render one change notification against the current state.
///
/// Returns `None` when the record has already disappeared.
pub(crate) fn change_line(state: &Reconciler, change: &StateChange) -> Option<String> {
    match change {
        StateChange::SessionUpserted(key) => state.session(key).map(|s| session_line(&s)),
        StateChange::ActionUpserted(id) => state.action(id).map(|a| action_line(&a)),
        StateChange::ProcessUpdated(key) => state.process(key).map(|p| process_line(&p)),
        StateChange::ActionRemoved(id) => Some(format!("action  {id} evicted")),
        StateChange::ProcessRemoved(key) => Some(format!("process {key} evicted")),
        StateChange::Reset => Some("state reset".to_string()),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

fn preview(text: &str) -> String {
    let flat: String = text.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}
