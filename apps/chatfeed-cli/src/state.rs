//! Terminal-facing state reducer for `chatfeed-cli`.

use std::collections::HashMap;

use backend_core::{
    FeedError, FeedEvent, FeedSnapshot, MessageView, MutationAck, MutationKind, PollState,
    Profile,
};
use tracing::{debug, warn};

const DEFAULT_STATUS: &str = "Signed out";
const MAX_PREVIEW_CHARS: usize = 280;

/// Printable view of the client state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliSnapshot {
    /// One rendered row per message, in feed order.
    pub lines: Vec<String>,
    pub status_text: String,
    pub error_text: Option<String>,
    pub pending_requests: usize,
    /// Set once the profile has been loaded for the current user.
    pub profile_text: Option<String>,
}

/// Reducer folding runtime events into a printable snapshot.
#[derive(Debug)]
pub struct CliState {
    authenticated: bool,
    identity: Option<String>,
    poll_state: PollState,
    messages: Vec<MessageView>,
    pending_requests: HashMap<String, MutationKind>,
    profile: Option<Profile>,
    status_text: String,
    error_text: Option<String>,
}

impl Default for CliState {
    fn default() -> Self {
        Self {
            authenticated: false,
            identity: None,
            poll_state: PollState::Idle,
            messages: Vec::new(),
            pending_requests: HashMap::new(),
            profile: None,
            status_text: DEFAULT_STATUS.to_owned(),
            error_text: None,
        }
    }
}

impl CliState {
    pub fn snapshot(&self) -> CliSnapshot {
        CliSnapshot {
            lines: self.messages.iter().map(render_message).collect(),
            status_text: self.status_text.clone(),
            error_text: self.error_text.clone(),
            pending_requests: self.pending_requests.len(),
            profile_text: self.profile.as_ref().map(render_profile),
        }
    }

    /// `true` once the feed is attached (polling or suspended).
    pub fn is_attached(&self) -> bool {
        self.poll_state != PollState::Idle
    }

    pub fn set_error_text(&mut self, text: impl Into<String>) {
        self.error_text = Some(text.into());
    }

    pub fn clear_error(&mut self) {
        self.error_text = None;
    }

    /// Track a submitted mutation until its acknowledgement arrives.
    pub fn mark_mutation_requested(&mut self, client_txn_id: String, kind: MutationKind) {
        self.pending_requests.insert(client_txn_id, kind);
    }

    /// Handle a mutation acknowledgement from the runtime.
    pub fn handle_mutation_ack(&mut self, ack: MutationAck) {
        let tracked = self.pending_requests.remove(&ack.client_txn_id).is_some();
        let verb = ack.kind.as_str();
        match ack.error {
            Some(error) => {
                warn!(
                    client_txn_id = %ack.client_txn_id,
                    code = %error.code,
                    tracked,
                    "{verb} acknowledgement reported failure"
                );
                self.error_text = Some(format!("{verb} failed ({}): {}", error.code, error.message));
            }
            None => {
                debug!(client_txn_id = %ack.client_txn_id, tracked, "{verb} acknowledged");
                self.clear_error();
            }
        }
    }

    /// Feed one runtime event into the reducer.
    pub fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::SessionChanged {
                authenticated,
                identity,
            } => {
                self.authenticated = authenticated;
                self.identity = identity;
                if !authenticated {
                    self.pending_requests.clear();
                    self.profile = None;
                }
                self.refresh_status();
            }
            FeedEvent::AuthResult { success, error } => {
                if success {
                    self.clear_error();
                } else {
                    self.error_text = Some(auth_error_text("sign-in", error.as_ref()));
                }
            }
            FeedEvent::RegisterResult { success, error } => {
                if success {
                    self.error_text = None;
                    self.status_text = "Account created; sign in with /login".to_owned();
                } else {
                    self.error_text = Some(auth_error_text("registration", error.as_ref()));
                }
            }
            FeedEvent::PollStateChanged { state } => {
                self.poll_state = state;
                self.refresh_status();
            }
            FeedEvent::FeedUpdated(snapshot) => {
                self.apply_snapshot(snapshot);
            }
            FeedEvent::ProfileLoaded(profile) => {
                debug!(username = %profile.username, "profile loaded");
                self.profile = Some(profile);
            }
            FeedEvent::MutationAck(ack) => {
                self.handle_mutation_ack(ack);
            }
            FeedEvent::CommandFailed { command, error } => {
                warn!(%command, code = %error.code, "command rejected by runtime");
                self.error_text = Some(format!("{command} failed ({}): {}", error.code, error.message));
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: FeedSnapshot) {
        self.messages = snapshot.messages;
        self.poll_state = snapshot.poll_state;
        match snapshot.error {
            Some(error) => self.error_text = Some(fetch_error_text(&error)),
            None => {
                if self
                    .error_text
                    .as_deref()
                    .is_some_and(|text| text.starts_with("fetch failed"))
                {
                    self.error_text = None;
                }
            }
        }
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        self.status_text = match (&self.identity, self.authenticated) {
            (_, false) => DEFAULT_STATUS.to_owned(),
            (Some(name), true) => format!("{name} | {}", poll_state_label(self.poll_state)),
            (None, true) => format!("signed in | {}", poll_state_label(self.poll_state)),
        };
    }
}

fn render_message(message: &MessageView) -> String {
    let mut line = format!(
        "[{}] {}{}: {}",
        message.id,
        message.author,
        if message.is_own { " (you)" } else { "" },
        preview(&message.content)
    );
    if message.is_edited {
        line.push_str(" (edited)");
    }
    if message.pending {
        line.push_str(" ...");
    }
    line
}

fn preview(content: &str) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= MAX_PREVIEW_CHARS {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(MAX_PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

fn poll_state_label(state: PollState) -> &'static str {
    match state {
        PollState::Idle => "Idle",
        PollState::Polling => "Live",
        PollState::Suspended => "Suspended",
    }
}

fn render_profile(profile: &Profile) -> String {
    let name = format!("{} {}", profile.first_name, profile.last_name);
    let name = name.trim();
    let mut text = profile.username.clone();
    if !name.is_empty() {
        text.push_str(&format!(" ({name})"));
    }
    if !profile.email.is_empty() {
        text.push_str(&format!(" <{}>", profile.email));
    }
    text
}

fn auth_error_text(action: &str, error: Option<&FeedError>) -> String {
    match error {
        Some(error) => format!("{action} failed ({}): {}", error.code, error.message),
        None => format!("{action} failed (unknown)"),
    }
}

fn fetch_error_text(error: &FeedError) -> String {
    if error.is_unauthorized() {
        format!("fetch failed ({}): sign in again with /login", error.code)
    } else {
        format!("fetch failed ({}): {}", error.code, error.message)
    }
}
