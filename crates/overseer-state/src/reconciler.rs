//! Session/action store fed by normalized updates.
//!
//! One writer (the connection's receive path) applies updates in arrival
//! order; any number of readers take snapshot copies. Every mutation is
//! announced on a broadcast channel after the write lock is released.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use overseer_protocol::{EventFrame, SessionKey, SessionRow};
use overseer_settings::{OverseerSettings, TieBreak};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::lineage::ActivityLog;
use crate::model::{Action, Process, Session, SessionStatus, StateChange};
use crate::normalize::{ActionUpdate, NormalizedUpdate, ProcessEvent, ProcessUpdate, normalize};
use crate::retention::OutputLimits;
use crate::status::{StatusThresholds, derive_status};

/// Reconciler tuning.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Recency window for sub-agent parent inference.
    pub subagent_window: Duration,
    /// Activity instants kept per session.
    pub activity_history: usize,
    /// Tie-break for parent inference.
    pub tie_break: TieBreak,
    /// Cold-start status thresholds.
    pub thresholds: StatusThresholds,
    /// Process output limits.
    pub output: OutputLimits,
    /// Change channel capacity.
    pub change_capacity: usize,
    /// Actions kept before the oldest is evicted.
    pub max_actions: usize,
    /// Processes kept before the oldest is evicted.
    pub max_processes: usize,
}

impl ReconcilerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &OverseerSettings) -> Self {
        let r = &settings.reconciler;
        Self {
            subagent_window: Duration::milliseconds(
                i64::try_from(r.subagent_window_ms).unwrap_or(i64::MAX),
            ),
            activity_history: r.activity_history,
            tie_break: r.tie_break,
            thresholds: StatusThresholds::from(r),
            output: OutputLimits::from(&settings.output),
            change_capacity: r.change_capacity,
            max_actions: r.max_actions,
            max_processes: r.max_processes,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_settings(&OverseerSettings::default())
    }
}

/// Reconciled sessions, actions and processes.
pub struct Reconciler {
    config: ReconcilerConfig,
    inner: RwLock<Inner>,
    changes: broadcast::Sender<StateChange>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Reconciler")
            .field("sessions", &inner.sessions.len())
            .field("actions", &inner.actions.len())
            .field("processes", &inner.processes.len())
            .finish_non_exhaustive()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

impl Reconciler {
    /// Create an empty reconciler.
    pub fn new(config: ReconcilerConfig) -> Self {
        let (changes, _) = broadcast::channel(config.change_capacity.max(1));
        let inner = Inner::new(config.activity_history);
        Self {
            config,
            inner: RwLock::new(inner),
            changes,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Receive change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Normalize and apply one event frame. Returns whether anything changed.
    pub fn apply_frame(&self, frame: &EventFrame, now: DateTime<Utc>) -> bool {
        match normalize(frame, now) {
            Some(update) => {
                self.apply(update);
                true
            }
            None => false,
        }
    }

    /// Apply one normalized update.
    pub fn apply(&self, update: NormalizedUpdate) {
        let mut changes = Vec::new();
        self.inner.write().apply(update, &self.config, &mut changes);
        self.publish(changes);
    }

    /// Fold a bulk session listing in, deriving cold-start statuses.
    pub fn reconcile_listing(&self, rows: &[SessionRow], now: DateTime<Utc>) {
        let mut changes = Vec::new();
        {
            let mut inner = self.inner.write();
            // Parents first, so sub-agents in the same listing can find them.
            let (children, parents): (Vec<&SessionRow>, Vec<&SessionRow>) = rows
                .iter()
                .partition(|row| SessionKey::parse(&row.key).is_subagent());
            for row in parents.into_iter().chain(children) {
                inner.reconcile_row(row, now, &self.config, &mut changes);
            }
        }
        debug!(rows = rows.len(), changed = changes.len(), "reconciled session listing");
        self.publish(changes);
    }

    /// Drop the run→session map. Called when a new connection starts.
    pub fn forget_runs(&self) {
        self.inner.write().run_sessions.clear();
    }

    /// Discard all state.
    pub fn clear(&self) {
        *self.inner.write() = Inner::new(self.config.activity_history);
        self.publish(vec![StateChange::Reset]);
    }

    fn publish(&self, changes: Vec<StateChange>) {
        for change in changes {
            // No subscribers is fine.
            let _ = self.changes.send(change);
        }
    }

    // ── snapshot reads ──────────────────────────────────────────────

    /// All sessions, sorted by key.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.read().sessions.values().cloned().collect()
    }

    /// One session.
    pub fn session(&self, key: &str) -> Option<Session> {
        self.inner.read().sessions.get(key).cloned()
    }

    /// All actions, in creation order.
    pub fn actions(&self) -> Vec<Action> {
        self.inner.read().actions.values().cloned().collect()
    }

    /// One action.
    pub fn action(&self, id: &str) -> Option<Action> {
        self.inner.read().actions.get(id).cloned()
    }

    /// Actions filed under `key`, in creation order.
    pub fn actions_for_session(&self, key: &str) -> Vec<Action> {
        self.inner
            .read()
            .actions
            .values()
            .filter(|a| a.session_key.as_deref() == Some(key))
            .cloned()
            .collect()
    }

    /// Actions whose session is not known yet.
    pub fn unresolved_actions(&self) -> Vec<Action> {
        self.inner
            .read()
            .actions
            .values()
            .filter(|a| a.session_key.is_none())
            .cloned()
            .collect()
    }

    /// All processes, in creation order.
    pub fn processes(&self) -> Vec<Process> {
        self.inner.read().processes.values().cloned().collect()
    }

    /// One process.
    pub fn process(&self, key: &str) -> Option<Process> {
        self.inner.read().processes.get(key).cloned()
    }

    /// Session learned for a run.
    pub fn run_session(&self, run_id: &str) -> Option<String> {
        self.inner.read().run_sessions.get(run_id).cloned()
    }

    /// Recent activity instants of a session, oldest first.
    pub fn activity(&self, key: &str) -> Vec<DateTime<Utc>> {
        self.inner.read().activity.history(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inner state
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    sessions: BTreeMap<String, Session>,
    actions: IndexMap<String, Action>,
    processes: IndexMap<String, Process>,
    run_sessions: HashMap<String, String>,
    activity: ActivityLog,
}

impl Inner {
    fn new(activity_history: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            actions: IndexMap::new(),
            processes: IndexMap::new(),
            run_sessions: HashMap::new(),
            activity: ActivityLog::new(activity_history),
        }
    }

    fn apply(
        &mut self,
        update: NormalizedUpdate,
        config: &ReconcilerConfig,
        changes: &mut Vec<StateChange>,
    ) {
        let NormalizedUpdate {
            run_id,
            session,
            action,
            process,
        } = update;
        let at = session.last_activity;

        if let (Some(run), Some(key)) = (&run_id, &session.key) {
            self.learn_run(run, key, changes);
        }
        let resolved = session.key.or_else(|| {
            run_id
                .as_ref()
                .and_then(|run| self.run_sessions.get(run).cloned())
        });

        if let Some(key) = &resolved {
            self.touch_session(key, session.status, at, config, changes);
        }
        if let Some(action) = action {
            self.merge_action(action, run_id.as_ref(), resolved.as_ref(), at, changes);
        }
        if let Some(process) = process {
            self.apply_process(process, run_id.as_ref(), resolved.as_ref(), config, changes);
        }
        self.evict(config, changes);
    }

    /// Drop the oldest actions and processes beyond the configured caps.
    fn evict(&mut self, config: &ReconcilerConfig, changes: &mut Vec<StateChange>) {
        while self.actions.len() > config.max_actions.max(1) {
            let Some((id, _)) = self.actions.shift_remove_index(0) else {
                break;
            };
            changes.push(StateChange::ActionRemoved(id));
        }
        while self.processes.len() > config.max_processes.max(1) {
            let Some((key, _)) = self.processes.shift_remove_index(0) else {
                break;
            };
            changes.push(StateChange::ProcessRemoved(key));
        }
    }

    /// Record `run → key` and refile anything of that run still unresolved.
    fn learn_run(&mut self, run: &str, key: &str, changes: &mut Vec<StateChange>) {
        if self.run_sessions.get(run).map(String::as_str) == Some(key) {
            return;
        }
        let _ = self.run_sessions.insert(run.to_string(), key.to_string());

        for action in self.actions.values_mut() {
            if action.session_key.is_none() && action.run_id.as_deref() == Some(run) {
                action.session_key = Some(key.to_string());
                changes.push(StateChange::ActionUpserted(action.id.clone()));
            }
        }
        for process in self.processes.values_mut() {
            if process.session_key.is_none() && process.run_id.as_deref() == Some(run) {
                process.session_key = Some(key.to_string());
                changes.push(StateChange::ProcessUpdated(process.key.clone()));
            }
        }
    }

    fn touch_session(
        &mut self,
        key: &str,
        status: Option<SessionStatus>,
        at: DateTime<Utc>,
        config: &ReconcilerConfig,
        changes: &mut Vec<StateChange>,
    ) {
        if !self.sessions.contains_key(key) {
            let session = self.new_session(key, at, config);
            let _ = self.sessions.insert(key.to_string(), session);
        }
        if let Some(session) = self.sessions.get_mut(key) {
            if let Some(status) = status {
                session.status = status;
            }
            session.last_activity = Some(at);
            self.activity.record(key, at);
            changes.push(StateChange::SessionUpserted(key.to_string()));
        }
    }

    /// A new session record, with an inferred parent for sub-agents.
    fn new_session(&self, key: &str, at: DateTime<Utc>, config: &ReconcilerConfig) -> Session {
        let mut session = Session::new(key);
        if session.parsed.is_subagent() {
            session.parent_key = self.activity.infer_parent(
                key,
                at,
                config.subagent_window,
                config.tie_break,
            );
            session.parent_inferred = session.parent_key.is_some();
            debug!(key, parent = ?session.parent_key, "new sub-agent session");
        }
        session
    }

    fn merge_action(
        &mut self,
        update: ActionUpdate,
        run_id: Option<&String>,
        session_key: Option<&String>,
        at: DateTime<Utc>,
        changes: &mut Vec<StateChange>,
    ) {
        let id = update.id.clone();
        match self.actions.get_mut(&id) {
            Some(existing) => {
                existing.seq = update.seq;
                existing.kind = update.kind;
                if update.content.is_some() {
                    existing.content = update.content;
                }
                if update.tool_name.is_some() {
                    existing.tool_name = update.tool_name;
                }
                if update.tool_args.is_some() {
                    existing.tool_args = update.tool_args;
                }
                if let Some(started_at) = update.started_at {
                    existing.started_at = started_at;
                }
                if update.ended_at.is_some() {
                    existing.ended_at = update.ended_at;
                }
                if update.usage.is_some() {
                    existing.usage = update.usage;
                }
                if update.stop_reason.is_some() {
                    existing.stop_reason = update.stop_reason;
                }
                if existing.run_id.is_none() {
                    existing.run_id = run_id.cloned();
                }
                if existing.session_key.is_none() {
                    existing.session_key = session_key.cloned();
                }
                existing.updated_at = at;
            }
            None => {
                let action = Action {
                    id: id.clone(),
                    run_id: run_id.cloned(),
                    session_key: session_key.cloned(),
                    seq: update.seq,
                    kind: update.kind,
                    content: update.content,
                    tool_name: update.tool_name,
                    tool_args: update.tool_args,
                    started_at: update.started_at.unwrap_or(at),
                    ended_at: update.ended_at,
                    updated_at: at,
                    usage: update.usage,
                    stop_reason: update.stop_reason,
                };
                let _ = self.actions.insert(id.clone(), action);
            }
        }
        changes.push(StateChange::ActionUpserted(id));
    }

    fn apply_process(
        &mut self,
        update: ProcessUpdate,
        run_id: Option<&String>,
        session_key: Option<&String>,
        config: &ReconcilerConfig,
        changes: &mut Vec<StateChange>,
    ) {
        let key = update.key;
        let process = self
            .processes
            .entry(key.clone())
            .or_insert_with(|| Process::new(key.clone(), run_id.cloned(), update.pid));
        if process.session_key.is_none() {
            process.session_key = session_key.cloned();
        }
        match update.event {
            ProcessEvent::Started { command, at } => {
                if command.is_some() {
                    process.command = command;
                }
                process.started_at = Some(at);
            }
            ProcessEvent::Output { stream, text, at } => {
                process.output.push(stream, &text, at, config.output);
            }
            ProcessEvent::Completed {
                exit_code,
                duration_ms,
                at,
            } => {
                process.exit_code = exit_code;
                process.duration_ms = duration_ms;
                process.ended_at = Some(at);
            }
        }
        changes.push(StateChange::ProcessUpdated(key));
    }

    fn reconcile_row(
        &mut self,
        row: &SessionRow,
        now: DateTime<Utc>,
        config: &ReconcilerConfig,
        changes: &mut Vec<StateChange>,
    ) {
        let updated_at = row.updated_at.and_then(DateTime::from_timestamp_millis);
        if let Some(at) = updated_at {
            self.activity.record(&row.key, at);
        }

        let previous = self.sessions.get(&row.key).cloned();
        if previous.is_none() {
            let session = if row.parent_session_key.is_some() {
                Session::new(&row.key)
            } else {
                self.new_session(&row.key, now, config)
            };
            let _ = self.sessions.insert(row.key.clone(), session);
        }
        let Some(session) = self.sessions.get_mut(&row.key) else {
            return;
        };

        session.status = derive_status(row, session.output_tokens, now, config.thresholds);
        if row.model.is_some() {
            session.model.clone_from(&row.model);
        }
        if row.display_name.is_some() {
            session.display_name.clone_from(&row.display_name);
        }
        if row.input_tokens.is_some() {
            session.input_tokens = row.input_tokens;
        }
        if row.output_tokens.is_some() {
            session.output_tokens = row.output_tokens;
        }
        if row.total_tokens.is_some() {
            session.total_tokens = row.total_tokens;
        }
        if let Some(at) = updated_at {
            session.last_activity = Some(session.last_activity.map_or(at, |prev| prev.max(at)));
        }
        if let Some(parent) = &row.parent_session_key {
            session.parent_key = Some(parent.clone());
            session.parent_inferred = false;
        }

        if previous.as_ref() != Some(&*session) {
            changes.push(StateChange::SessionUpserted(row.key.clone()));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
