use crate::message::{MessageId, SessionId};

/// Stream routing key used for stale-fragment rejection.
///
/// `stream_id` changes on every send, so fragments of an abandoned reply can
/// never land in a newer one for the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: SessionId,
    pub stream_id: u64,
}

impl StreamTarget {
    pub fn new(session_id: SessionId, stream_id: u64) -> Self {
        Self {
            session_id,
            stream_id,
        }
    }
}

/// Per-session reply lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming {
        target: StreamTarget,
        reply_id: MessageId,
        accumulator: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start {
        target: StreamTarget,
        reply_id: MessageId,
    },
    Append {
        target: StreamTarget,
        fragment: String,
    },
    Finish(StreamTarget),
    Hydrate,
}

/// Result of an accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Started,
    /// Full accumulated text after the append, plus the message it belongs to.
    Accumulated { reply_id: MessageId, text: String },
    Finished { reply_id: MessageId, text: String },
    HydrateAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    TargetMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    HydrateWhileStreaming {
        active: StreamTarget,
    },
}

pub type StreamTransitionResult = Result<StreamOutcome, StreamTransitionRejection>;

impl StreamState {
    pub fn active_target(&self) -> Option<&StreamTarget> {
        match self {
            Self::Streaming { target, .. } => Some(target),
            Self::Idle => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn accepts(&self, target: &StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition in place; a rejected transition leaves the state untouched.
    pub fn apply(&mut self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start { target, reply_id } => self.apply_start(target, reply_id),
            StreamTransition::Append { target, fragment } => self.apply_append(&target, &fragment),
            StreamTransition::Finish(target) => self.apply_finish(&target),
            StreamTransition::Hydrate => self.apply_hydrate(),
        }
    }

    fn apply_start(&mut self, target: StreamTarget, reply_id: MessageId) -> StreamTransitionResult {
        if let Self::Streaming { target: active, .. } = self {
            return Err(StreamTransitionRejection::AlreadyStreaming {
                active: active.clone(),
                attempted: target,
            });
        }

        *self = Self::Streaming {
            target,
            reply_id,
            accumulator: String::new(),
        };
        Ok(StreamOutcome::Started)
    }

    fn apply_append(&mut self, target: &StreamTarget, fragment: &str) -> StreamTransitionResult {
        match self {
            Self::Streaming {
                target: active,
                reply_id,
                accumulator,
            } if active == target => {
                accumulator.push_str(fragment);
                Ok(StreamOutcome::Accumulated {
                    reply_id: reply_id.clone(),
                    text: accumulator.clone(),
                })
            }
            Self::Streaming { target: active, .. } => Err(StreamTransitionRejection::TargetMismatch {
                active: active.clone(),
                attempted: target.clone(),
            }),
            Self::Idle => Err(StreamTransitionRejection::NoActiveStream),
        }
    }

    fn apply_finish(&mut self, target: &StreamTarget) -> StreamTransitionResult {
        if !self.accepts(target) {
            return Err(self.rejection_for(target));
        }

        match std::mem::take(self) {
            Self::Streaming {
                reply_id,
                accumulator,
                ..
            } => Ok(StreamOutcome::Finished {
                reply_id,
                text: accumulator,
            }),
            Self::Idle => Err(StreamTransitionRejection::NoActiveStream),
        }
    }

    fn rejection_for(&self, target: &StreamTarget) -> StreamTransitionRejection {
        match self.active_target() {
            Some(active) => StreamTransitionRejection::TargetMismatch {
                active: active.clone(),
                attempted: target.clone(),
            },
            None => StreamTransitionRejection::NoActiveStream,
        }
    }

    fn apply_hydrate(&self) -> StreamTransitionResult {
        match self {
            Self::Streaming { target, .. } => Err(StreamTransitionRejection::HydrateWhileStreaming {
                active: target.clone(),
            }),
            Self::Idle => Ok(StreamOutcome::HydrateAllowed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(stream_id: u64) -> StreamTarget {
        StreamTarget::new(SessionId::new("chat-1"), stream_id)
    }

    fn streaming(stream_id: u64) -> StreamState {
        let mut state = StreamState::Idle;
        state
            .apply(StreamTransition::Start {
                target: target(stream_id),
                reply_id: MessageId::new("assistant-1"),
            })
            .unwrap();
        state
    }

    #[test]
    fn append_accumulates_for_matching_target() {
        let mut state = streaming(1);
        state
            .apply(StreamTransition::Append {
                target: target(1),
                fragment: "You ".to_string(),
            })
            .unwrap();
        let outcome = state
            .apply(StreamTransition::Append {
                target: target(1),
                fragment: "fly".to_string(),
            })
            .unwrap();

        assert_eq!(
            outcome,
            StreamOutcome::Accumulated {
                reply_id: MessageId::new("assistant-1"),
                text: "You fly".to_string(),
            }
        );
    }

    #[test]
    fn stale_target_is_rejected_without_side_effects() {
        let mut state = streaming(2);
        let before = state.clone();

        let rejection = state
            .apply(StreamTransition::Append {
                target: target(1),
                fragment: "stale".to_string(),
            })
            .unwrap_err();
        assert!(matches!(rejection, StreamTransitionRejection::TargetMismatch { .. }));

        let rejection = state.apply(StreamTransition::Finish(target(1))).unwrap_err();
        assert!(matches!(rejection, StreamTransitionRejection::TargetMismatch { .. }));
        assert_eq!(state, before);
    }

    #[test]
    fn start_while_streaming_is_rejected() {
        let mut state = streaming(1);
        let rejection = state
            .apply(StreamTransition::Start {
                target: target(2),
                reply_id: MessageId::new("assistant-2"),
            })
            .unwrap_err();

        assert_eq!(
            rejection,
            StreamTransitionRejection::AlreadyStreaming {
                active: target(1),
                attempted: target(2),
            }
        );
    }

    #[test]
    fn finish_returns_to_idle_with_text() {
        let mut state = streaming(1);
        state
            .apply(StreamTransition::Append {
                target: target(1),
                fragment: "done".to_string(),
            })
            .unwrap();

        let outcome = state.apply(StreamTransition::Finish(target(1))).unwrap();
        assert_eq!(
            outcome,
            StreamOutcome::Finished {
                reply_id: MessageId::new("assistant-1"),
                text: "done".to_string(),
            }
        );
        assert_eq!(state, StreamState::Idle);
        assert_eq!(
            state.apply(StreamTransition::Finish(target(1))),
            Err(StreamTransitionRejection::NoActiveStream)
        );
    }

    #[test]
    fn hydrate_is_rejected_while_streaming() {
        let mut state = streaming(1);
        assert!(matches!(
            state.apply(StreamTransition::Hydrate),
            Err(StreamTransitionRejection::HydrateWhileStreaming { .. })
        ));

        let mut idle = StreamState::Idle;
        assert_eq!(
            idle.apply(StreamTransition::Hydrate),
            Ok(StreamOutcome::HydrateAllowed)
        );
    }
}
