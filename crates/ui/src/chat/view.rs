use std::sync::Arc;
use std::time::Duration;

use gpui::*;
use gpui_component::{ActiveTheme, h_flex, label::Label, v_flex};
use gpui_tokio_bridge::Tokio;
use somnia_chat::{PendingReply, SessionId, SessionManager, StreamTarget};
use somnia_llm::{
    FragmentStream, ProviderWorker, ReplyRequest, ResponseProvider, StreamEvent,
    StreamEventPayload, StreamId,
};

use crate::app::{AppServices, SharedStore};
use crate::chat::events::{
    LogoutClicked, NewSessionClicked, SearchChanged, SessionDeleteClicked, SessionSelected, Stop,
    Submit, ThemeToggleClicked,
};
use crate::chat::{ChatSidebar, MessageInput, MessageList, SessionRow};

pub const STREAM_DEBOUNCE_MS: u64 = 50;
const SIDEBAR_WIDTH: Pixels = px(264.);

/// Coordinates the session manager with the sidebar, transcript, composer and reply stream.
pub struct ChatView {
    manager: SessionManager<SharedStore>,
    provider: Option<Arc<dyn ResponseProvider>>,
    provider_error: Option<SharedString>,
    sidebar: Entity<ChatSidebar>,
    message_list: Entity<MessageList>,
    message_input: Entity<MessageInput>,
    search_query: String,
    stream_worker_task: Option<Task<Result<(), gpui_tokio_bridge::JoinError>>>,
    stream_reader_task: Option<Task<()>>,
    stream_debounce_task: Option<Task<()>>,
    pending_fragment: Option<(StreamTarget, String)>,
}

impl EventEmitter<LogoutClicked> for ChatView {}
impl EventEmitter<ThemeToggleClicked> for ChatView {}

impl ChatView {
    pub fn new(
        services: &AppServices,
        username: &str,
        dark_mode: bool,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let manager = SessionManager::new(services.store.clone(), username);
        let sidebar = cx.new(|cx| ChatSidebar::new(username.to_string(), window, cx));
        let message_list = cx.new(MessageList::new);
        let message_input = cx.new(|cx| MessageInput::new(window, cx));

        sidebar.update(cx, |sidebar, cx| sidebar.set_dark_mode(dark_mode, cx));

        cx.subscribe(&sidebar, |this, _, event: &SessionSelected, cx| {
            this.select_session(&event.session_id, cx);
        })
        .detach();

        cx.subscribe(&sidebar, |this, _, event: &SessionDeleteClicked, cx| {
            this.delete_session(&event.session_id, cx);
        })
        .detach();

        cx.subscribe_in(
            &sidebar,
            window,
            |this, _, _event: &NewSessionClicked, window, cx| {
                this.create_session(window, cx);
            },
        )
        .detach();

        cx.subscribe(&sidebar, |this, _, event: &SearchChanged, cx| {
            this.search_query = event.query.clone();
            this.sync_sidebar(cx);
        })
        .detach();

        cx.subscribe(&sidebar, |_, _, _event: &LogoutClicked, cx| {
            cx.emit(LogoutClicked);
        })
        .detach();

        cx.subscribe(&sidebar, |_, _, _event: &ThemeToggleClicked, cx| {
            cx.emit(ThemeToggleClicked);
        })
        .detach();

        cx.subscribe(&message_input, |this, _, event: &Submit, cx| {
            this.handle_submit(&event.text, cx);
        })
        .detach();

        cx.subscribe(&message_input, |this, _, _event: &Stop, cx| {
            this.interrupt_stream(cx);
        })
        .detach();

        let mut this = Self {
            manager,
            provider: services.provider.clone(),
            provider_error: services.provider_error.clone(),
            sidebar,
            message_list,
            message_input,
            search_query: String::new(),
            stream_worker_task: None,
            stream_reader_task: None,
            stream_debounce_task: None,
            pending_fragment: None,
        };
        this.sync_sidebar(cx);
        this.sync_messages(true, cx);
        this
    }

    pub fn username(&self) -> &str {
        self.manager.username()
    }

    pub fn set_dark_mode(&mut self, dark_mode: bool, cx: &mut Context<Self>) {
        self.sidebar
            .update(cx, |sidebar, cx| sidebar.set_dark_mode(dark_mode, cx));
    }

    pub fn create_session(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.interrupt_stream(cx);
        self.manager.create_session();

        self.search_query.clear();
        self.sidebar
            .update(cx, |sidebar, cx| sidebar.clear_search(window, cx));

        self.sync_sidebar(cx);
        self.sync_messages(true, cx);
    }

    /// Stops any reply in flight, keeping the text received so far; called before logout.
    pub fn shutdown(&mut self, cx: &mut Context<Self>) {
        self.interrupt_stream(cx);
    }

    fn select_session(&mut self, id: &SessionId, cx: &mut Context<Self>) {
        if self.manager.active_session_id() == Some(id) {
            return;
        }

        self.interrupt_stream(cx);
        if !self.manager.select_session(id) {
            tracing::debug!(session_id = %id, "session selection rejected");
        }

        self.sync_sidebar(cx);
        self.sync_messages(true, cx);
    }

    fn delete_session(&mut self, id: &SessionId, cx: &mut Context<Self>) {
        if self
            .manager
            .in_flight()
            .is_some_and(|target| &target.session_id == id)
        {
            self.interrupt_stream(cx);
        }

        if self.manager.delete_session(id) {
            self.sync_sidebar(cx);
            self.sync_messages(true, cx);
        }
    }

    fn handle_submit(&mut self, text: &str, cx: &mut Context<Self>) {
        self.interrupt_stream(cx);

        let Some(pending) = self.manager.send_message(text) else {
            return;
        };

        self.sync_sidebar(cx);
        self.sync_messages(false, cx);
        self.start_reply(pending, cx);
    }

    fn start_reply(&mut self, pending: PendingReply, cx: &mut Context<Self>) {
        let Some(provider) = self.provider.clone() else {
            let reason = self
                .provider_error
                .as_ref()
                .map(|error| error.to_string())
                .unwrap_or_else(|| "no response provider configured".to_string());
            self.manager.fail_reply(&pending.target, &reason);
            self.sync_messages(false, cx);
            return;
        };

        let stream_id = StreamId::new(pending.target.stream_id);
        let request = ReplyRequest::new(stream_id, pending.request_text);
        match provider.stream_reply(request) {
            Ok(handle) => {
                tracing::debug!(
                    provider = provider.id(),
                    target = ?pending.target,
                    "reply stream opened"
                );
                self.spawn_stream_worker(handle.worker, cx);
                self.spawn_stream_reader(pending.target, handle.stream, cx);
            }
            Err(error) => {
                self.manager.fail_reply(&pending.target, &error.to_string());
                self.sync_messages(false, cx);
            }
        }
    }

    fn spawn_stream_worker(&mut self, worker: ProviderWorker, cx: &mut Context<Self>) {
        self.stream_worker_task = Some(Tokio::spawn(cx, worker));
    }

    fn spawn_stream_reader(
        &mut self,
        target: StreamTarget,
        mut stream: FragmentStream,
        cx: &mut Context<Self>,
    ) {
        self.stream_reader_task = Some(cx.spawn(async move |this, cx| {
            while let Some(event) = stream.recv().await {
                let _ = this.update(cx, |this, cx| {
                    this.handle_stream_event(&target, event, cx);
                });
            }

            let _ = this.update(cx, |this, cx| {
                this.handle_stream_closed(&target, cx);
            });
        }));
    }

    fn handle_stream_event(
        &mut self,
        target: &StreamTarget,
        event: StreamEvent,
        cx: &mut Context<Self>,
    ) {
        if event.stream_id.0 != target.stream_id || self.manager.in_flight() != Some(target) {
            return;
        }

        match event.payload {
            StreamEventPayload::Fragment(fragment) => {
                let buffer = match self.pending_fragment.take() {
                    Some((pending_target, mut buffer)) if &pending_target == target => {
                        buffer.push_str(&fragment);
                        buffer
                    }
                    _ => fragment,
                };
                self.pending_fragment = Some((target.clone(), buffer));
                self.schedule_fragment_flush(cx);
            }
            StreamEventPayload::Done => {
                self.flush_pending_fragment(cx);
                self.manager.complete_reply(target);
                self.finish_stream(cx);
            }
            StreamEventPayload::Error(reason) => {
                self.pending_fragment = None;
                self.manager.fail_reply(target, &reason);
                self.finish_stream(cx);
            }
        }
    }

    fn handle_stream_closed(&mut self, target: &StreamTarget, cx: &mut Context<Self>) {
        self.stream_worker_task = None;
        self.stream_reader_task = None;

        if self.manager.in_flight() == Some(target) {
            self.pending_fragment = None;
            self.manager
                .fail_reply(target, "reply stream ended before a terminal event");
            self.finish_stream(cx);
        }
    }

    fn schedule_fragment_flush(&mut self, cx: &mut Context<Self>) {
        if self.stream_debounce_task.is_some() {
            return;
        }

        self.stream_debounce_task = Some(cx.spawn(async move |this, cx| {
            cx.background_executor()
                .timer(Duration::from_millis(STREAM_DEBOUNCE_MS))
                .await;

            let _ = this.update(cx, |this, cx| {
                this.stream_debounce_task = None;
                this.flush_pending_fragment(cx);
            });
        }));
    }

    fn flush_pending_fragment(&mut self, cx: &mut Context<Self>) {
        let Some((target, fragment)) = self.pending_fragment.take() else {
            return;
        };

        if self.manager.apply_fragment(&target, &fragment) {
            self.sync_messages(false, cx);
        }
    }

    fn finish_stream(&mut self, cx: &mut Context<Self>) {
        self.stream_debounce_task = None;
        self.stream_worker_task = None;
        self.sync_messages(false, cx);
    }

    /// Applies buffered text, drops the stream tasks and cancels the reply in the manager.
    ///
    /// Dropping the reader drops its `FragmentStream`, which signals the worker to stop.
    fn interrupt_stream(&mut self, cx: &mut Context<Self>) {
        if !self.manager.is_streaming() {
            return;
        }

        self.flush_pending_fragment(cx);
        self.stream_debounce_task = None;
        self.stream_worker_task = None;
        self.stream_reader_task = None;

        if let Some(target) = self.manager.cancel_reply() {
            tracing::debug!(target = ?target, "reply interrupted");
        }
        self.sync_messages(false, cx);
    }

    fn sync_sidebar(&mut self, cx: &mut Context<Self>) {
        let rows = self
            .manager
            .search_sessions(&self.search_query)
            .into_iter()
            .map(SessionRow::from)
            .collect();
        let selected = self.manager.active_session_id().cloned();
        let has_sessions = !self.manager.visible_sessions().is_empty();

        self.sidebar.update(cx, |sidebar, cx| {
            sidebar.set_rows(rows, selected, has_sessions, cx);
        });
    }

    fn sync_messages(&mut self, reset_scroll: bool, cx: &mut Context<Self>) {
        let messages = self.manager.live_messages().to_vec();
        let streaming_reply_id = self.manager.streaming_reply_id().cloned();
        let streaming = self.manager.is_streaming();

        self.message_list.update(cx, |list, cx| {
            list.set_messages(messages, streaming_reply_id, cx);
            if reset_scroll {
                list.reset_scroll(cx);
            }
        });
        self.message_input.update(cx, |input, cx| {
            input.set_streaming(streaming, cx);
        });
        cx.notify();
    }

    fn render_provider_banner(&self, cx: &mut Context<Self>) -> Option<AnyElement> {
        let error = self.provider_error.clone()?;
        let theme = cx.theme();

        Some(
            h_flex()
                .w_full()
                .px_4()
                .py_2()
                .border_b_1()
                .border_color(theme.border)
                .bg(theme.muted)
                .child(
                    Label::new(format!("Dream interpretation is unavailable: {error}"))
                        .text_xs()
                        .text_color(theme.danger),
                )
                .into_any_element(),
        )
    }
}

impl Render for ChatView {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let banner = self.render_provider_banner(cx);
        let theme = cx.theme();

        h_flex()
            .id("chat-view")
            .size_full()
            .min_h_0()
            .overflow_hidden()
            .bg(theme.background)
            .child(
                div()
                    .id("chat-view-sidebar")
                    .w(SIDEBAR_WIDTH)
                    .h_full()
                    .flex_shrink_0()
                    .border_r_1()
                    .border_color(theme.border)
                    .child(self.sidebar.clone()),
            )
            .child(
                v_flex()
                    .id("chat-view-main")
                    .flex_1()
                    .h_full()
                    .min_w_0()
                    .min_h_0()
                    .children(banner)
                    .child(
                        div()
                            .id("chat-view-message-list")
                            .flex_1()
                            .min_h_0()
                            .child(self.message_list.clone()),
                    )
                    .child(
                        div()
                            .id("chat-view-message-input")
                            .flex_shrink_0()
                            .w_full()
                            .border_t_1()
                            .border_color(theme.border)
                            .child(self.message_input.clone()),
                    ),
            )
    }
}
