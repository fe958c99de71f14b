use std::collections::HashMap;

use somnia_storage::KeyValueStore;

use crate::message::{Message, MessageId, Session, SessionId};
use crate::store::{ChatHistory, ChatStore};
use crate::stream_state::{
    StreamOutcome, StreamState, StreamTarget, StreamTransition, StreamTransitionRejection,
};
use crate::title::derive_title;

pub const REPLY_FAILED_TEXT: &str =
    "Sorry, I couldn't interpret your dream right now. Please try again later.";

/// Work handed back by `send_message`: open a reply stream for `request_text`
/// and route its fragments to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub target: StreamTarget,
    pub request_text: String,
}

/// Owns one user's sessions, the active selection and the in-flight reply.
///
/// At most one reply streams at a time. Anything that changes what the user
/// is looking at (switching, creating, deleting, a new send) cancels it first,
/// keeping whatever text already arrived.
pub struct SessionManager<S> {
    history: ChatHistory<S>,
    active_session_id: Option<SessionId>,
    live_messages: Vec<Message>,
    stream_states: HashMap<SessionId, StreamState>,
    in_flight: Option<StreamTarget>,
    next_stream_id: u64,
}

impl<S: KeyValueStore> SessionManager<S> {
    pub fn new(store: S, username: impl Into<String>) -> Self {
        let mut history = ChatHistory::new(ChatStore::new(store), username);
        history.load();

        Self {
            history,
            active_session_id: None,
            live_messages: Vec::new(),
            stream_states: HashMap::new(),
            in_flight: None,
            next_stream_id: 1,
        }
    }

    pub fn username(&self) -> &str {
        self.history.username()
    }

    pub fn sessions(&self) -> &[Session] {
        self.history.sessions()
    }

    pub fn active_session_id(&self) -> Option<&SessionId> {
        self.active_session_id.as_ref()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_session_id
            .as_ref()
            .and_then(|id| self.history.session(id))
    }

    pub fn live_messages(&self) -> &[Message] {
        &self.live_messages
    }

    pub fn in_flight(&self) -> Option<&StreamTarget> {
        self.in_flight.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn stream_state(&self, id: &SessionId) -> StreamState {
        self.stream_states.get(id).cloned().unwrap_or_default()
    }

    /// Placeholder message currently being filled, if any.
    pub fn streaming_reply_id(&self) -> Option<&MessageId> {
        let target = self.in_flight.as_ref()?;
        match self.stream_states.get(&target.session_id)? {
            StreamState::Streaming { reply_id, .. } => Some(reply_id),
            StreamState::Idle => None,
        }
    }

    pub fn visible_sessions(&self) -> Vec<&Session> {
        self.history
            .sessions()
            .iter()
            .filter(|session| session.is_visible())
            .collect()
    }

    /// Visible sessions whose title contains `query`, ignoring case.
    pub fn search_sessions(&self, query: &str) -> Vec<&Session> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.visible_sessions();
        }

        self.visible_sessions()
            .into_iter()
            .filter(|session| session.title.to_lowercase().contains(&query))
            .collect()
    }

    pub fn create_session(&mut self) -> SessionId {
        self.cancel_reply();

        let id = SessionId::generate();
        self.history.push(Session::new(id.clone()));
        self.active_session_id = Some(id.clone());
        self.live_messages.clear();

        tracing::debug!(session_id = %id, "created session");
        id
    }

    /// Returns `false` for unknown ids and for a rejected re-hydration.
    pub fn select_session(&mut self, id: &SessionId) -> bool {
        if !self.history.contains(id) {
            tracing::debug!(session_id = %id, "ignoring selection of unknown session");
            return false;
        }

        if self.active_session_id.as_ref() != Some(id) {
            self.cancel_reply();
        }

        self.active_session_id = Some(id.clone());
        self.hydrate_active()
    }

    pub fn send_message(&mut self, text: &str) -> Option<PendingReply> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.cancel_reply();

        let session_id = match self.active_session_id.clone() {
            Some(id) if self.history.contains(&id) => id,
            _ => self.create_session(),
        };

        let user_message = Message::user(text);
        let placeholder = Message::assistant_placeholder();
        let reply_id = placeholder.id.clone();

        self.history.update(&session_id, |session| {
            if session.messages.is_empty() {
                session.title = derive_title(text);
            }
            session.messages.push(user_message.clone());
            session.messages.push(placeholder.clone());
        })?;
        self.live_messages.push(user_message);
        self.live_messages.push(placeholder);

        let target = StreamTarget::new(session_id.clone(), self.next_stream_id);
        self.next_stream_id += 1;

        let state = self.stream_states.entry(session_id).or_default();
        if let Err(rejection) = state.apply(StreamTransition::Start {
            target: target.clone(),
            reply_id,
        }) {
            tracing::error!(rejection = ?rejection, "stream start rejected after cancellation");
            return None;
        }

        self.in_flight = Some(target.clone());
        tracing::debug!(target = ?target, "reply pending");

        Some(PendingReply {
            target,
            request_text: text.to_string(),
        })
    }

    /// Appends a fragment to the reply for `target`; stale targets are ignored.
    pub fn apply_fragment(&mut self, target: &StreamTarget, fragment: &str) -> bool {
        let Some(state) = self.stream_states.get_mut(&target.session_id) else {
            return false;
        };

        match state.apply(StreamTransition::Append {
            target: target.clone(),
            fragment: fragment.to_string(),
        }) {
            Ok(StreamOutcome::Accumulated { reply_id, text }) => {
                self.write_reply_text(&target.session_id, &reply_id, text);
                true
            }
            Ok(_) => false,
            Err(rejection) => {
                log_stale(target, &rejection);
                false
            }
        }
    }

    /// Ends the reply normally. A reply that produced no text counts as a failure.
    pub fn complete_reply(&mut self, target: &StreamTarget) -> bool {
        match self.finish_stream(target) {
            Some((reply_id, text)) if text.is_empty() => {
                tracing::warn!(target = ?target, "reply stream finished without any text");
                self.write_reply_text(&target.session_id, &reply_id, REPLY_FAILED_TEXT.to_string());
                true
            }
            Some(_) => {
                tracing::debug!(target = ?target, "reply completed");
                true
            }
            None => false,
        }
    }

    /// Replaces the reply with the fixed failure text, discarding partial content.
    pub fn fail_reply(&mut self, target: &StreamTarget, reason: &str) -> bool {
        let Some((reply_id, _)) = self.finish_stream(target) else {
            return false;
        };

        tracing::warn!(target = ?target, reason = %reason, "reply stream failed");
        self.write_reply_text(&target.session_id, &reply_id, REPLY_FAILED_TEXT.to_string());
        true
    }

    /// Stops the in-flight reply, keeping the text received so far.
    ///
    /// Returns the cancelled target so the caller can drop its stream handle.
    pub fn cancel_reply(&mut self) -> Option<StreamTarget> {
        let target = self.in_flight.clone()?;
        let (reply_id, text) = self.finish_stream(&target)?;

        if text.is_empty() {
            let session_id = &target.session_id;
            self.history.update(session_id, |session| {
                session.messages.retain(|message| message.id != reply_id);
            });
            if self.is_active(session_id) {
                self.live_messages.retain(|message| message.id != reply_id);
            }
        }

        tracing::debug!(target = ?target, kept_chars = text.chars().count(), "reply cancelled");
        Some(target)
    }

    pub fn delete_session(&mut self, id: &SessionId) -> bool {
        if self
            .in_flight
            .as_ref()
            .is_some_and(|target| &target.session_id == id)
        {
            self.cancel_reply();
        }

        if self.history.remove(id).is_none() {
            return false;
        }
        self.stream_states.remove(id);

        if self.is_active(id) {
            self.active_session_id = None;
            self.live_messages.clear();
        }

        tracing::debug!(session_id = %id, "deleted session");
        true
    }

    /// Re-reads the store and re-hydrates the active session.
    pub fn reload(&mut self) {
        if self.is_streaming() {
            tracing::debug!("reload skipped while a reply is streaming");
            return;
        }

        if !self.history.load() {
            return;
        }
        let active_missing = self
            .active_session_id
            .as_ref()
            .is_some_and(|id| !self.history.contains(id));
        if active_missing {
            self.active_session_id = None;
            self.live_messages.clear();
            return;
        }

        self.hydrate_active();
    }

    fn hydrate_active(&mut self) -> bool {
        let Some(id) = self.active_session_id.clone() else {
            return false;
        };

        let state = self.stream_states.entry(id.clone()).or_default();
        if let Err(rejection) = state.apply(StreamTransition::Hydrate) {
            tracing::debug!(session_id = %id, rejection = ?rejection, "hydration rejected");
            return false;
        }

        self.live_messages = self
            .active_session()
            .map(|session| session.messages.clone())
            .unwrap_or_default();
        true
    }

    fn finish_stream(&mut self, target: &StreamTarget) -> Option<(MessageId, String)> {
        let state = self.stream_states.get_mut(&target.session_id)?;
        match state.apply(StreamTransition::Finish(target.clone())) {
            Ok(StreamOutcome::Finished { reply_id, text }) => {
                if self.in_flight.as_ref() == Some(target) {
                    self.in_flight = None;
                }
                Some((reply_id, text))
            }
            Ok(_) => None,
            Err(rejection) => {
                log_stale(target, &rejection);
                None
            }
        }
    }

    fn write_reply_text(&mut self, session_id: &SessionId, reply_id: &MessageId, text: String) {
        if self.is_active(session_id)
            && let Some(message) = self
                .live_messages
                .iter_mut()
                .find(|message| &message.id == reply_id)
        {
            message.text.clone_from(&text);
        }

        self.history.update(session_id, |session| {
            if let Some(message) = session.message_mut(reply_id) {
                message.text = text;
            }
        });
    }

    fn is_active(&self, id: &SessionId) -> bool {
        self.active_session_id.as_ref() == Some(id)
    }
}

fn log_stale(target: &StreamTarget, rejection: &StreamTransitionRejection) {
    tracing::debug!(target = ?target, rejection = ?rejection, "ignoring stale stream event");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use somnia_storage::MemoryKeyValueStore;

    use std::sync::atomic::Ordering;

    use super::*;
    use crate::message::Role;
    use crate::store::history_key;
    use crate::store::tests::FlakyStore;

    fn manager() -> SessionManager<Arc<MemoryKeyValueStore>> {
        SessionManager::new(Arc::new(MemoryKeyValueStore::new()), "alice")
    }

    fn texts(messages: &[Message]) -> Vec<(Role, &str)> {
        messages
            .iter()
            .map(|message| (message.role, message.text.as_str()))
            .collect()
    }

    #[test]
    fn first_dream_becomes_a_titled_visible_session() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(&history_key("alice"), "[]").unwrap();
        let mut manager = SessionManager::new(kv.clone(), "alice");

        manager.create_session();
        let pending = manager
            .send_message("I dreamed about flying over mountains")
            .unwrap();
        assert_eq!(pending.request_text, "I dreamed about flying over mountains");

        assert!(manager.apply_fragment(&pending.target, "Flying often means "));
        assert!(manager.apply_fragment(&pending.target, "freedom."));
        assert!(manager.complete_reply(&pending.target));

        let visible = manager.visible_sessions();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "I dreamed about");
        assert_eq!(
            texts(&visible[0].messages),
            vec![
                (Role::User, "I dreamed about flying over mountains"),
                (Role::Assistant, "Flying often means freedom."),
            ]
        );
        assert_eq!(manager.live_messages(), visible[0].messages.as_slice());

        let reloaded = SessionManager::new(kv, "alice");
        assert_eq!(reloaded.visible_sessions().len(), 1);
    }

    #[test]
    fn blank_send_changes_nothing() {
        let mut manager = manager();
        manager.create_session();
        let pending = manager.send_message("falling").unwrap();
        manager.complete_reply(&pending.target);
        let before = manager.live_messages().to_vec();

        assert_eq!(manager.send_message("   \n\t"), None);
        assert_eq!(manager.live_messages(), before.as_slice());
    }

    #[test]
    fn send_without_active_session_creates_one() {
        let mut manager = manager();
        let pending = manager.send_message("  teeth falling out ").unwrap();

        assert_eq!(manager.active_session_id(), Some(&pending.target.session_id));
        assert_eq!(pending.request_text, "teeth falling out");
        assert_eq!(manager.live_messages()[0].text, "teeth falling out");
        assert_eq!(manager.live_messages()[1].text, "");
        assert!(manager.stream_state(&pending.target.session_id).is_streaming());
    }

    #[test]
    fn messages_are_stored_before_any_reply() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut manager = SessionManager::new(kv.clone(), "alice");
        manager.send_message("a dark forest").unwrap();

        let stored = ChatStore::new(kv).load("alice").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            texts(&stored[0].messages),
            vec![(Role::User, "a dark forest"), (Role::Assistant, "")]
        );
    }

    #[test]
    fn title_is_assigned_only_once() {
        let mut manager = manager();
        let first = manager.send_message("lost in a maze").unwrap();
        manager.complete_reply(&first.target);
        let second = manager.send_message("then found a door").unwrap();
        manager.complete_reply(&second.target);

        assert_eq!(manager.active_session().unwrap().title, "lost in a");
    }

    #[test]
    fn empty_sessions_stay_hidden() {
        let mut manager = manager();
        manager.create_session();
        manager.create_session();

        assert_eq!(manager.sessions().len(), 2);
        assert!(manager.visible_sessions().is_empty());
    }

    #[test]
    fn switching_during_stream_keeps_partial_text_once() {
        let mut manager = manager();
        let first = manager.send_message("ocean waves").unwrap();
        let first_id = first.target.session_id.clone();
        manager.apply_fragment(&first.target, "Water is ");
        manager.apply_fragment(&first.target, "emotion");

        let second_id = manager.create_session();
        assert!(!manager.stream_state(&first_id).is_streaming());

        // Late fragments from the abandoned stream are dropped.
        assert!(!manager.apply_fragment(&first.target, " and more"));
        assert!(!manager.complete_reply(&first.target));

        assert!(manager.select_session(&first_id));
        assert_eq!(
            texts(manager.live_messages()),
            vec![(Role::User, "ocean waves"), (Role::Assistant, "Water is emotion")]
        );

        assert!(manager.select_session(&second_id));
        assert!(manager.live_messages().is_empty());
    }

    #[test]
    fn new_send_abandons_previous_stream() {
        let mut manager = manager();
        let first = manager.send_message("snakes").unwrap();
        manager.apply_fragment(&first.target, "partial");

        let second = manager.send_message("spiders").unwrap();
        assert!(second.target.stream_id > first.target.stream_id);
        assert!(!manager.apply_fragment(&first.target, "late"));
        assert!(manager.apply_fragment(&second.target, "fear"));
        manager.complete_reply(&second.target);

        assert_eq!(
            texts(manager.live_messages()),
            vec![
                (Role::User, "snakes"),
                (Role::Assistant, "partial"),
                (Role::User, "spiders"),
                (Role::Assistant, "fear"),
            ]
        );
    }

    #[test]
    fn reselecting_streaming_session_does_not_rehydrate() {
        let mut manager = manager();
        let pending = manager.send_message("flying").unwrap();
        manager.apply_fragment(&pending.target, "Up");

        assert!(!manager.select_session(&pending.target.session_id));
        assert!(manager.is_streaming());
        assert_eq!(manager.live_messages()[1].text, "Up");
    }

    #[test]
    fn failure_replaces_partial_text() {
        let mut manager = manager();
        let pending = manager.send_message("a storm").unwrap();
        manager.apply_fragment(&pending.target, "half an answ");

        assert!(manager.fail_reply(&pending.target, "connection reset"));
        assert_eq!(manager.live_messages()[1].text, REPLY_FAILED_TEXT);
        assert!(!manager.is_streaming());
    }

    #[test]
    fn empty_completion_counts_as_failure() {
        let mut manager = manager();
        let pending = manager.send_message("a quiet room").unwrap();

        assert!(manager.complete_reply(&pending.target));
        assert_eq!(manager.live_messages()[1].text, REPLY_FAILED_TEXT);
    }

    #[test]
    fn cancel_keeps_partial_text_and_drops_empty_placeholder() {
        let mut manager = manager();
        let pending = manager.send_message("a wedding").unwrap();
        manager.apply_fragment(&pending.target, "Union");

        assert_eq!(manager.cancel_reply(), Some(pending.target.clone()));
        assert_eq!(manager.live_messages()[1].text, "Union");
        assert_eq!(manager.cancel_reply(), None);

        let silent = manager.send_message("a funeral").unwrap();
        assert_eq!(manager.cancel_reply(), Some(silent.target));
        assert_eq!(
            texts(manager.live_messages()),
            vec![
                (Role::User, "a wedding"),
                (Role::Assistant, "Union"),
                (Role::User, "a funeral"),
            ]
        );
        assert_eq!(manager.active_session().unwrap().messages.len(), 3);
    }

    #[test]
    fn deleting_active_session_clears_selection() {
        let mut manager = manager();
        let pending = manager.send_message("a cat").unwrap();
        let id = pending.target.session_id.clone();

        assert!(manager.delete_session(&id));
        assert_eq!(manager.active_session_id(), None);
        assert!(manager.live_messages().is_empty());
        assert!(!manager.is_streaming());
        assert!(manager.sessions().is_empty());
        assert!(!manager.apply_fragment(&pending.target, "late"));
    }

    #[test]
    fn deleting_other_session_keeps_selection() {
        let mut manager = manager();
        let first = manager.send_message("a dog").unwrap();
        manager.complete_reply(&first.target);
        let other = first.target.session_id.clone();

        let second_id = manager.create_session();
        let second = manager.send_message("a bird").unwrap();
        manager.complete_reply(&second.target);
        let before = manager.live_messages().to_vec();

        assert!(manager.delete_session(&other));
        assert_eq!(manager.active_session_id(), Some(&second_id));
        assert_eq!(manager.live_messages(), before.as_slice());
        assert!(!manager.delete_session(&other));
    }

    #[test]
    fn unknown_selection_is_a_no_op() {
        let mut manager = manager();
        let pending = manager.send_message("a train").unwrap();

        assert!(!manager.select_session(&SessionId::new("chat-missing")));
        assert!(manager.is_streaming());
        assert_eq!(manager.active_session_id(), Some(&pending.target.session_id));
    }

    #[test]
    fn search_filters_visible_titles_case_insensitively() {
        let mut manager = manager();
        for dream in ["Flying over water", "Falling from stairs", "Water and fire"] {
            manager.create_session();
            let pending = manager.send_message(dream).unwrap();
            manager.complete_reply(&pending.target);
        }
        manager.create_session();

        let titles = |sessions: Vec<&Session>| {
            sessions
                .into_iter()
                .map(|session| session.title.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            titles(manager.search_sessions("  WATER ")),
            vec!["Flying over water".to_string(), "Water and fire".to_string()]
        );
        assert_eq!(titles(manager.search_sessions("")).len(), 3);
    }

    #[test]
    fn reload_picks_up_external_changes() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut manager = SessionManager::new(kv.clone(), "alice");
        let pending = manager.send_message("a key").unwrap();
        manager.complete_reply(&pending.target);

        kv.set(&history_key("alice"), "[]").unwrap();
        manager.reload();

        assert!(manager.sessions().is_empty());
        assert_eq!(manager.active_session_id(), None);
        assert!(manager.live_messages().is_empty());
    }

    #[test]
    fn corrupt_history_starts_empty() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(&history_key("alice"), "{\"oops\": true}").unwrap();

        let manager = SessionManager::new(kv, "alice");
        assert!(manager.sessions().is_empty());
    }

    #[test]
    fn unreadable_history_is_never_overwritten() {
        let kv = Arc::new(FlakyStore::default());
        let mut first = SessionManager::new(kv.clone(), "alice");
        for dream in ["falling", "flying", "teeth"] {
            first.create_session();
            let pending = first.send_message(dream).unwrap();
            first.apply_fragment(&pending.target, "meaning");
            first.complete_reply(&pending.target);
        }

        kv.fail_reads.store(true, Ordering::SeqCst);
        let mut second = SessionManager::new(kv.clone(), "alice");
        second.create_session();
        assert!(second.send_message("a new dream").is_some());
        second.reload();

        kv.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(ChatStore::new(kv).load("alice").unwrap().len(), 3);
    }
}
