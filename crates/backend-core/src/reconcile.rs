//! Optimistic feed projection.
//!
//! `FeedEngine` owns the ordered message collection and the per-message
//! pending marks. Every mutation is split in two: `begin_*` validates the
//! intent, applies it optimistically and returns a ticket describing the
//! request to issue; `complete_*` folds the request's result back in. Polls
//! go through `apply_poll`, which never disturbs a pending message.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::{
    error::{FeedError, FeedErrorKind},
    types::{FeedSnapshot, Message, MessageId, MessageView, PollState},
};

/// In-flight mutation for one message, with what is needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingMutation {
    Send,
    Edit {
        previous: Message,
    },
    Delete {
        message: Message,
        index: usize,
        anchor: Option<MessageId>,
    },
}

/// `create` request to issue for an optimistic send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTicket {
    pub local_id: MessageId,
    /// Trimmed content.
    pub content: String,
}

/// `update` request to issue for an optimistic edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTicket {
    pub id: MessageId,
    /// Trimmed content.
    pub content: String,
}

/// `delete` request to issue for an optimistic delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteTicket {
    pub id: MessageId,
}

#[derive(Debug, Clone)]
pub struct FeedEngine {
    messages: Vec<Message>,
    pending: HashMap<MessageId, PendingMutation>,
    identity: Option<String>,
    last_error: Option<FeedError>,
    next_local_id: i64,
}

impl Default for FeedEngine {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            pending: HashMap::new(),
            identity: None,
            last_error: None,
            next_local_id: -1,
        }
    }
}

impl FeedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current messages in display order, pending ones included.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn last_error(&self) -> Option<&FeedError> {
        self.last_error.as_ref()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Set the acting identity used for ownership checks.
    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity;
    }

    /// Drop all messages, pending marks and the error slot.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.pending.clear();
        self.last_error = None;
    }

    /// Render-ready projection.
    pub fn snapshot(&self, poll_state: PollState) -> FeedSnapshot {
        let messages = self
            .messages
            .iter()
            .map(|message| MessageView {
                id: message.id,
                content: message.content.clone(),
                author: message.author.clone(),
                created_at: message.created_at,
                updated_at: message.updated_at,
                is_edited: message.is_edited,
                pending: self.pending.contains_key(&message.id),
                is_own: self.identity.as_deref() == Some(message.author.as_str()),
            })
            .collect();

        FeedSnapshot {
            messages,
            poll_state,
            error: self.last_error.clone(),
        }
    }

    /// Append a pending message with a temporary id.
    pub fn begin_send(&mut self, content: &str) -> Result<SendTicket, FeedError> {
        let content = normalized_content(content)?;
        let local_id = self.allocate_local_id();
        let now = Utc::now();

        self.messages.push(Message {
            id: local_id,
            content: content.clone(),
            author: self.identity.clone().unwrap_or_default(),
            created_at: now,
            updated_at: now,
            is_edited: false,
        });
        self.pending.insert(local_id, PendingMutation::Send);
        trace!(%local_id, "optimistic send appended");

        Ok(SendTicket { local_id, content })
    }

    /// Resolve a send: promote in place on success, drop on failure.
    pub fn complete_send(
        &mut self,
        local_id: MessageId,
        result: Result<Message, FeedError>,
    ) -> Result<MessageId, FeedError> {
        match self.pending.remove(&local_id) {
            Some(PendingMutation::Send) => {}
            other => return self.ignore_stale(local_id, other, result.map(|message| message.id)),
        }

        match result {
            Ok(message) => {
                let id = message.id;
                if self.pending.contains_key(&id) {
                    // A poll delivered the message first and the user already
                    // acted on it; that copy wins.
                    self.remove_entry(local_id);
                    return Ok(id);
                }

                self.messages.retain(|existing| existing.id != id);
                match self.position(local_id) {
                    Some(index) => self.messages[index] = message,
                    None => self.messages.push(message),
                }
                debug!(%local_id, message_id = %id, "send confirmed");
                Ok(id)
            }
            Err(err) => {
                self.remove_entry(local_id);
                warn!(%local_id, error_code = %err.code, "send failed; optimistic entry removed");
                Err(err)
            }
        }
    }

    /// Apply new content to an own, idle message.
    pub fn begin_edit(&mut self, id: MessageId, content: &str) -> Result<EditTicket, FeedError> {
        let content = normalized_content(content)?;
        if self.pending.contains_key(&id) {
            return Err(FeedError::busy(id));
        }
        let index = self
            .position(id)
            .ok_or_else(|| FeedError::unknown_message(id))?;
        self.ensure_author(&self.messages[index])?;

        let previous = self.messages[index].clone();
        self.messages[index].content = content.clone();
        self.pending
            .insert(id, PendingMutation::Edit { previous });
        trace!(message_id = %id, "optimistic edit applied");

        Ok(EditTicket { id, content })
    }

    /// Resolve an edit: adopt the server copy, or revert.
    pub fn complete_edit(
        &mut self,
        id: MessageId,
        result: Result<Message, FeedError>,
    ) -> Result<MessageId, FeedError> {
        let previous = match self.pending.remove(&id) {
            Some(PendingMutation::Edit { previous }) => previous,
            other => return self.ignore_stale(id, other, result.map(|message| message.id)),
        };

        match result {
            Ok(message) => {
                if let Some(index) = self.position(id) {
                    self.messages[index] = message;
                }
                debug!(message_id = %id, "edit confirmed");
                Ok(id)
            }
            Err(err) if err.kind == FeedErrorKind::NotFound => {
                self.remove_entry(id);
                warn!(message_id = %id, "edit target vanished; removed locally");
                Err(err)
            }
            Err(err) => {
                if let Some(index) = self.position(id) {
                    self.messages[index] = previous;
                }
                warn!(message_id = %id, error_code = %err.code, "edit failed; reverted");
                Err(err)
            }
        }
    }

    /// Remove an own, idle message from the projection.
    pub fn begin_delete(&mut self, id: MessageId) -> Result<DeleteTicket, FeedError> {
        if self.pending.contains_key(&id) {
            return Err(FeedError::busy(id));
        }
        let index = self
            .position(id)
            .ok_or_else(|| FeedError::unknown_message(id))?;
        self.ensure_author(&self.messages[index])?;

        let anchor = index.checked_sub(1).map(|before| self.messages[before].id);
        let message = self.messages.remove(index);
        self.pending.insert(
            id,
            PendingMutation::Delete {
                message,
                index,
                anchor,
            },
        );
        trace!(message_id = %id, index, "optimistic delete applied");

        Ok(DeleteTicket { id })
    }

    /// Resolve a delete: final on success, reinsert on failure.
    pub fn complete_delete(
        &mut self,
        id: MessageId,
        result: Result<(), FeedError>,
    ) -> Result<MessageId, FeedError> {
        let (message, index, anchor) = match self.pending.remove(&id) {
            Some(PendingMutation::Delete {
                message,
                index,
                anchor,
            }) => (message, index, anchor),
            other => return self.ignore_stale(id, other, result.map(|()| id)),
        };

        match result {
            Ok(()) => {
                debug!(message_id = %id, "delete confirmed");
                Ok(id)
            }
            Err(err) if err.kind == FeedErrorKind::NotFound => {
                debug!(message_id = %id, "delete target already gone");
                Err(err)
            }
            Err(err) => {
                self.restore(message, index, anchor);
                warn!(message_id = %id, error_code = %err.code, "delete failed; restored");
                Err(err)
            }
        }
    }

    /// Merge a poll result.
    ///
    /// Returns `true` when the projection was rebuilt. Failures only fill
    /// the error slot; the last known good projection stays.
    pub fn apply_poll(&mut self, result: Result<Vec<Message>, FeedError>) -> bool {
        match result {
            Ok(server) => {
                self.last_error = None;
                self.merge(server);
                true
            }
            Err(err) => {
                debug!(error_code = %err.code, "poll failed; keeping last projection");
                self.last_error = Some(err);
                false
            }
        }
    }

    fn merge(&mut self, server: Vec<Message>) {
        let previous = std::mem::take(&mut self.messages);
        let mut local_copies: HashMap<MessageId, &Message> = previous
            .iter()
            .filter(|message| self.pending.contains_key(&message.id))
            .map(|message| (message.id, message))
            .collect();

        let mut seen = HashSet::with_capacity(server.len());
        let mut merged = Vec::with_capacity(server.len() + self.pending.len());
        for message in server {
            if !seen.insert(message.id) {
                continue;
            }
            match self.pending.get(&message.id) {
                None => merged.push(message),
                Some(PendingMutation::Delete { .. }) => {}
                Some(PendingMutation::Edit { .. } | PendingMutation::Send) => {
                    let overlay = local_copies
                        .remove(&message.id)
                        .cloned()
                        .unwrap_or(message);
                    merged.push(overlay);
                }
            }
        }

        // Pending entries the server did not list keep their place.
        let mut trailing_sends = Vec::new();
        for (index, message) in previous.iter().enumerate() {
            if !local_copies.contains_key(&message.id) {
                continue;
            }
            match self.pending.get(&message.id) {
                Some(PendingMutation::Send) => trailing_sends.push(message.clone()),
                Some(PendingMutation::Edit { .. }) => {
                    let at = previous[..index]
                        .iter()
                        .rev()
                        .find_map(|before| merged.iter().position(|m| m.id == before.id))
                        .map_or(0, |found| found + 1);
                    merged.insert(at, message.clone());
                }
                _ => {}
            }
        }
        merged.extend(trailing_sends);

        trace!(
            message_count = merged.len(),
            pending = self.pending.len(),
            "poll merged"
        );
        self.messages = merged;
    }

    fn restore(&mut self, message: Message, index: usize, anchor: Option<MessageId>) {
        if self.position(message.id).is_some() {
            return;
        }
        let at = match anchor {
            None => 0,
            Some(anchor) => self
                .position(anchor)
                .map_or(index.min(self.messages.len()), |found| found + 1),
        };
        self.messages.insert(at, message);
    }

    fn ensure_author(&self, message: &Message) -> Result<(), FeedError> {
        if let Some(identity) = self.identity.as_deref()
            && message.author != identity
        {
            return Err(FeedError::not_author(message.id));
        }
        Ok(())
    }

    fn ignore_stale(
        &mut self,
        id: MessageId,
        mark: Option<PendingMutation>,
        result: Result<MessageId, FeedError>,
    ) -> Result<MessageId, FeedError> {
        if let Some(mark) = mark {
            self.pending.insert(id, mark);
        }
        debug!(message_id = %id, "ignoring completion without a matching pending mark");
        result
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id == id)
    }

    fn remove_entry(&mut self, id: MessageId) {
        if let Some(index) = self.position(id) {
            self.messages.remove(index);
        }
    }

    fn allocate_local_id(&mut self) -> MessageId {
        let id = MessageId(self.next_local_id);
        self.next_local_id = self.next_local_id.saturating_sub(1);
        id
    }
}

fn normalized_content(content: &str) -> Result<String, FeedError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(FeedError::empty_content());
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn message(id: i64, author: &str, content: &str) -> Message {
        let at = DateTime::from_timestamp(1_731_000_000 + id, 0).expect("valid timestamp");
        Message {
            id: MessageId(id),
            content: content.to_owned(),
            author: author.to_owned(),
            created_at: at,
            updated_at: at,
            is_edited: false,
        }
    }

    fn engine_as(identity: &str, feed: Vec<Message>) -> FeedEngine {
        let mut engine = FeedEngine::new();
        engine.set_identity(Some(identity.to_owned()));
        assert!(engine.apply_poll(Ok(feed)));
        engine
    }

    fn ids(engine: &FeedEngine) -> Vec<i64> {
        engine.messages().iter().map(|m| m.id.0).collect()
    }

    fn network_error() -> FeedError {
        FeedError::timeout("request")
    }

    #[test]
    fn send_scenario_promotes_pending_entry_in_place() {
        let mut engine = engine_as("alice", vec![]);

        let ticket = engine.begin_send("  hello ").expect("send should start");
        assert_eq!(ticket.content, "hello");

        let snapshot = engine.snapshot(PollState::Polling);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "hello");
        assert!(snapshot.messages[0].pending);
        assert!(snapshot.messages[0].id.is_local());

        let confirmed = engine
            .complete_send(ticket.local_id, Ok(message(42, "alice", "hello")))
            .expect("send should confirm");
        assert_eq!(confirmed, MessageId(42));

        let snapshot = engine.snapshot(PollState::Polling);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].id, MessageId(42));
        assert_eq!(snapshot.messages[0].content, "hello");
        assert!(!snapshot.messages[0].pending);
        assert!(snapshot.messages[0].is_own);
    }

    #[test]
    fn successful_sends_keep_issue_order() {
        let mut engine = engine_as("alice", vec![message(1, "bob", "hi")]);

        let a = engine.begin_send("a").expect("a");
        let b = engine.begin_send("b").expect("b");
        let c = engine.begin_send("c").expect("c");

        engine
            .complete_send(b.local_id, Ok(message(11, "alice", "b")))
            .expect("b confirms");
        engine
            .complete_send(c.local_id, Ok(message(12, "alice", "c")))
            .expect("c confirms");
        engine
            .complete_send(a.local_id, Ok(message(13, "alice", "a")))
            .expect("a confirms");

        let contents: Vec<_> = engine.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "a", "b", "c"]);
        assert_eq!(ids(&engine), vec![1, 13, 11, 12]);
    }

    #[test]
    fn failed_send_leaves_no_residue() {
        let mut engine = engine_as("alice", vec![message(1, "bob", "hi")]);
        let before = engine.messages().len();

        let ticket = engine.begin_send("doomed").expect("send should start");
        assert_eq!(engine.messages().len(), before + 1);

        let err = engine
            .complete_send(ticket.local_id, Err(network_error()))
            .expect_err("send should fail");
        assert_eq!(err.kind, FeedErrorKind::Network);
        assert_eq!(engine.messages().len(), before);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn rejects_blank_content_before_any_request() {
        let mut engine = engine_as("alice", vec![message(1, "alice", "hi")]);

        let err = engine.begin_send("   \n").expect_err("blank send must fail");
        assert_eq!(err.code, "empty_content");
        let err = engine
            .begin_edit(MessageId(1), "")
            .expect_err("blank edit must fail");
        assert_eq!(err.kind, FeedErrorKind::Rejected);
        assert_eq!(engine.messages().len(), 1);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn edit_of_foreign_message_is_forbidden_locally() {
        let mut engine = engine_as("bob", vec![message(7, "alice", "original")]);

        let err = engine
            .begin_edit(MessageId(7), "hijack")
            .expect_err("edit must be rejected");
        assert_eq!(err.kind, FeedErrorKind::Forbidden);
        assert_eq!(engine.messages()[0].content, "original");
        assert!(!engine.is_pending(MessageId(7)));
    }

    #[test]
    fn delete_of_foreign_message_is_forbidden_and_projection_unchanged() {
        let mut engine = engine_as("bob", vec![message(7, "alice", "mine")]);
        let before = engine.messages().to_vec();

        let err = engine
            .begin_delete(MessageId(7))
            .expect_err("delete must be rejected");
        assert_eq!(err.kind, FeedErrorKind::Forbidden);
        assert_eq!(engine.messages(), before.as_slice());
    }

    #[test]
    fn second_edit_while_first_in_flight_is_busy() {
        let mut engine = engine_as("alice", vec![message(5, "alice", "x")]);

        engine.begin_edit(MessageId(5), "a").expect("first edit");
        let err = engine
            .begin_edit(MessageId(5), "b")
            .expect_err("second edit must be busy");
        assert_eq!(err.kind, FeedErrorKind::Busy);
        assert_eq!(engine.messages()[0].content, "a");

        let err = engine
            .begin_delete(MessageId(5))
            .expect_err("delete during edit must be busy");
        assert_eq!(err.kind, FeedErrorKind::Busy);
    }

    #[test]
    fn edit_of_unconfirmed_send_is_busy() {
        let mut engine = engine_as("alice", vec![]);
        let ticket = engine.begin_send("draft").expect("send");

        let err = engine
            .begin_edit(ticket.local_id, "changed")
            .expect_err("pending send cannot be edited");
        assert_eq!(err.kind, FeedErrorKind::Busy);
    }

    #[test]
    fn edit_success_adopts_server_copy() {
        let mut engine = engine_as("alice", vec![message(5, "alice", "old")]);
        let ticket = engine.begin_edit(MessageId(5), " new ").expect("edit");
        assert_eq!(ticket.content, "new");
        assert_eq!(engine.messages()[0].content, "new");

        let mut server = message(5, "alice", "new");
        server.is_edited = true;
        engine
            .complete_edit(MessageId(5), Ok(server.clone()))
            .expect("edit confirms");

        assert_eq!(engine.messages()[0], server);
        assert!(!engine.is_pending(MessageId(5)));
    }

    #[test]
    fn edit_failure_reverts_to_snapshot() {
        let original = message(5, "alice", "old");
        let mut engine = engine_as("alice", vec![original.clone()]);
        engine.begin_edit(MessageId(5), "new").expect("edit");

        let err = engine
            .complete_edit(
                MessageId(5),
                Err(FeedError::new(FeedErrorKind::Forbidden, "http_status", "no")),
            )
            .expect_err("edit fails");
        assert_eq!(err.kind, FeedErrorKind::Forbidden);
        assert_eq!(engine.messages()[0], original);
        assert!(!engine.is_pending(MessageId(5)));
    }

    #[test]
    fn edit_not_found_removes_message() {
        let mut engine = engine_as(
            "alice",
            vec![message(4, "bob", "a"), message(5, "alice", "b")],
        );
        engine.begin_edit(MessageId(5), "new").expect("edit");

        engine
            .complete_edit(
                MessageId(5),
                Err(FeedError::new(FeedErrorKind::NotFound, "http_status", "gone")),
            )
            .expect_err("edit fails");
        assert_eq!(ids(&engine), vec![4]);
    }

    #[test]
    fn delete_success_is_final() {
        let mut engine = engine_as(
            "alice",
            vec![message(1, "alice", "a"), message(2, "alice", "b")],
        );
        engine.begin_delete(MessageId(1)).expect("delete");
        assert_eq!(ids(&engine), vec![2]);

        engine
            .complete_delete(MessageId(1), Ok(()))
            .expect("delete confirms");
        assert_eq!(ids(&engine), vec![2]);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn delete_failure_restores_original_position() {
        let mut engine = engine_as(
            "alice",
            vec![
                message(1, "bob", "a"),
                message(2, "alice", "b"),
                message(3, "bob", "c"),
            ],
        );
        engine.begin_delete(MessageId(2)).expect("delete");
        assert_eq!(ids(&engine), vec![1, 3]);

        engine
            .complete_delete(MessageId(2), Err(network_error()))
            .expect_err("delete fails");
        assert_eq!(ids(&engine), vec![1, 2, 3]);
    }

    #[test]
    fn delete_failure_restores_first_message_at_front() {
        let mut engine = engine_as(
            "alice",
            vec![message(1, "alice", "a"), message(2, "bob", "b")],
        );
        engine.begin_delete(MessageId(1)).expect("delete");
        engine
            .complete_delete(MessageId(1), Err(network_error()))
            .expect_err("delete fails");
        assert_eq!(ids(&engine), vec![1, 2]);
    }

    #[test]
    fn delete_not_found_stays_removed() {
        let mut engine = engine_as("alice", vec![message(1, "alice", "a")]);
        engine.begin_delete(MessageId(1)).expect("delete");

        let err = engine
            .complete_delete(
                MessageId(1),
                Err(FeedError::new(FeedErrorKind::NotFound, "http_status", "gone")),
            )
            .expect_err("surfaced");
        assert_eq!(err.kind, FeedErrorKind::NotFound);
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn poll_during_pending_delete_does_not_resurrect() {
        let mut engine = engine_as(
            "alice",
            vec![message(1, "bob", "a"), message(2, "alice", "x")],
        );
        engine.begin_delete(MessageId(2)).expect("delete");

        engine.apply_poll(Ok(vec![message(1, "bob", "a"), message(2, "alice", "x")]));
        assert_eq!(ids(&engine), vec![1]);

        engine
            .complete_delete(MessageId(2), Ok(()))
            .expect("delete confirms");
        engine.apply_poll(Ok(vec![message(1, "bob", "a")]));
        assert_eq!(ids(&engine), vec![1]);
    }

    #[test]
    fn poll_during_pending_delete_then_failure_restores_once() {
        let mut engine = engine_as(
            "alice",
            vec![message(1, "bob", "a"), message(2, "alice", "x")],
        );
        engine.begin_delete(MessageId(2)).expect("delete");
        engine.apply_poll(Ok(vec![
            message(1, "bob", "a"),
            message(2, "alice", "x"),
            message(3, "bob", "c"),
        ]));

        engine
            .complete_delete(MessageId(2), Err(network_error()))
            .expect_err("delete fails");
        assert_eq!(ids(&engine), vec![1, 2, 3]);
    }

    #[test]
    fn poll_keeps_optimistic_edit_content() {
        let mut engine = engine_as("alice", vec![message(5, "alice", "old")]);
        engine.begin_edit(MessageId(5), "new").expect("edit");

        engine.apply_poll(Ok(vec![message(4, "bob", "x"), message(5, "alice", "old")]));
        assert_eq!(ids(&engine), vec![4, 5]);
        assert_eq!(engine.messages()[1].content, "new");
        assert!(engine.is_pending(MessageId(5)));
    }

    #[test]
    fn poll_keeps_pending_edit_missing_from_server_in_place() {
        let mut engine = engine_as(
            "alice",
            vec![
                message(1, "bob", "a"),
                message(5, "alice", "old"),
                message(6, "bob", "c"),
            ],
        );
        engine.begin_edit(MessageId(5), "new").expect("edit");

        engine.apply_poll(Ok(vec![message(1, "bob", "a"), message(6, "bob", "c")]));
        assert_eq!(ids(&engine), vec![1, 5, 6]);
    }

    #[test]
    fn poll_keeps_unconfirmed_sends_appended() {
        let mut engine = engine_as("alice", vec![message(1, "bob", "a")]);
        let ticket = engine.begin_send("mine").expect("send");

        engine.apply_poll(Ok(vec![message(1, "bob", "a"), message(2, "bob", "b")]));
        let order: Vec<_> = engine.messages().iter().map(|m| m.id).collect();
        assert_eq!(order, vec![MessageId(1), MessageId(2), ticket.local_id]);

        engine
            .complete_send(ticket.local_id, Ok(message(3, "alice", "mine")))
            .expect("confirm");
        assert_eq!(ids(&engine), vec![1, 2, 3]);
    }

    #[test]
    fn send_confirmation_after_poll_saw_it_stays_unique() {
        let mut engine = engine_as("alice", vec![]);
        let ticket = engine.begin_send("hello").expect("send");

        engine.apply_poll(Ok(vec![message(42, "alice", "hello")]));
        assert_eq!(engine.messages().len(), 2);

        engine
            .complete_send(ticket.local_id, Ok(message(42, "alice", "hello")))
            .expect("confirm");
        assert_eq!(ids(&engine), vec![42]);
    }

    #[test]
    fn poll_replaces_confirmed_portion_with_server_order() {
        let mut engine = engine_as(
            "alice",
            vec![message(1, "bob", "a"), message(2, "bob", "b")],
        );

        engine.apply_poll(Ok(vec![
            message(3, "bob", "c"),
            message(1, "bob", "a2"),
            message(3, "bob", "dup"),
        ]));
        assert_eq!(ids(&engine), vec![3, 1]);
        assert_eq!(engine.messages()[0].content, "c");
        assert_eq!(engine.messages()[1].content, "a2");
    }

    #[test]
    fn poll_failure_keeps_last_known_good_and_sets_error() {
        let mut engine = engine_as("alice", vec![message(1, "bob", "a")]);

        assert!(!engine.apply_poll(Err(network_error())));
        assert_eq!(ids(&engine), vec![1]);
        let snapshot = engine.snapshot(PollState::Polling);
        assert_eq!(
            snapshot.error.as_ref().map(|e| e.kind),
            Some(FeedErrorKind::Network)
        );

        assert!(engine.apply_poll(Ok(vec![message(1, "bob", "a")])));
        assert!(engine.snapshot(PollState::Polling).error.is_none());
    }

    #[test]
    fn stale_completions_do_not_touch_state() {
        let mut engine = engine_as("alice", vec![message(5, "alice", "x")]);
        engine.begin_edit(MessageId(5), "y").expect("edit");

        let result = engine.complete_delete(MessageId(5), Ok(()));
        assert_eq!(result, Ok(MessageId(5)));
        assert!(engine.is_pending(MessageId(5)));
        assert_eq!(ids(&engine), vec![5]);

        engine.reset();
        let result = engine.complete_edit(MessageId(5), Err(network_error()));
        assert!(result.is_err());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn unresolved_identity_defers_author_check_to_server() {
        let mut engine = FeedEngine::new();
        engine.apply_poll(Ok(vec![message(7, "alice", "x")]));

        engine
            .begin_delete(MessageId(7))
            .expect("without identity the server decides");
        let snapshot = engine.snapshot(PollState::Polling);
        assert!(snapshot.messages.is_empty());
    }

    #[test]
    fn unknown_target_is_not_found() {
        let mut engine = engine_as("alice", vec![]);
        let err = engine
            .begin_edit(MessageId(99), "x")
            .expect_err("unknown id");
        assert_eq!(err.kind, FeedErrorKind::NotFound);
        let err = engine.begin_delete(MessageId(99)).expect_err("unknown id");
        assert_eq!(err.code, "message_not_found");
    }

    #[test]
    fn snapshot_flags_ownership_per_identity() {
        let engine = engine_as(
            "alice",
            vec![message(1, "alice", "mine"), message(2, "bob", "theirs")],
        );
        let snapshot = engine.snapshot(PollState::Polling);
        assert!(snapshot.messages[0].is_own);
        assert!(!snapshot.messages[1].is_own);
        assert_eq!(snapshot.poll_state, PollState::Polling);
    }
}
