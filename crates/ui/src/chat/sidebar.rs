use std::rc::Rc;

use gpui::*;
use gpui_component::{
    ActiveTheme, Icon, IconName, Sizable, VirtualListScrollHandle,
    button::{Button, ButtonVariants},
    h_flex,
    input::{Input, InputEvent, InputState},
    label::Label,
    list::ListItem,
    v_flex, v_virtual_list,
};
use somnia_chat::{Session, SessionId};

use crate::chat::events::{
    LogoutClicked, NewSessionClicked, SearchChanged, SessionDeleteClicked, SessionSelected,
    ThemeToggleClicked,
};

const SESSION_ROW_HEIGHT: f32 = 40.0;

/// Row snapshot rendered by the sidebar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub id: SessionId,
    pub title: String,
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
        }
    }
}

/// Session list with search, per-row delete and the signed-in user's footer.
///
/// Holds no chat state of its own; `ChatView` pushes rows in and reacts to the emitted events.
pub struct ChatSidebar {
    search_input: Entity<InputState>,
    search_query: String,
    rows: Rc<Vec<SessionRow>>,
    item_sizes: Rc<Vec<Size<Pixels>>>,
    selected: Option<SessionId>,
    username: SharedString,
    has_sessions: bool,
    dark_mode: bool,
    scroll_handle: VirtualListScrollHandle,
}

impl EventEmitter<SessionSelected> for ChatSidebar {}
impl EventEmitter<SessionDeleteClicked> for ChatSidebar {}
impl EventEmitter<NewSessionClicked> for ChatSidebar {}
impl EventEmitter<SearchChanged> for ChatSidebar {}
impl EventEmitter<LogoutClicked> for ChatSidebar {}
impl EventEmitter<ThemeToggleClicked> for ChatSidebar {}

impl ChatSidebar {
    pub fn new(
        username: impl Into<SharedString>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let search_input =
            cx.new(|cx| InputState::new(window, cx).placeholder("Search dreams..."));

        cx.subscribe_in(
            &search_input,
            window,
            |this, _, _event: &InputEvent, _window, cx| {
                let query = this.search_input.read(cx).value().to_string();
                if query != this.search_query {
                    this.search_query = query.clone();
                    cx.emit(SearchChanged { query });
                }
            },
        )
        .detach();

        Self {
            search_input,
            search_query: String::new(),
            rows: Rc::new(Vec::new()),
            item_sizes: Rc::new(Vec::new()),
            selected: None,
            username: username.into(),
            has_sessions: false,
            dark_mode: true,
            scroll_handle: VirtualListScrollHandle::new(),
        }
    }

    /// `has_sessions` tells an empty search result apart from an empty history.
    pub fn set_rows(
        &mut self,
        rows: Vec<SessionRow>,
        selected: Option<SessionId>,
        has_sessions: bool,
        cx: &mut Context<Self>,
    ) {
        self.item_sizes = Rc::new(
            rows.iter()
                .map(|_| size(px(0.), px(SESSION_ROW_HEIGHT)))
                .collect(),
        );
        self.rows = Rc::new(rows);
        self.selected = selected;
        self.has_sessions = has_sessions;
        cx.notify();
    }

    pub fn set_dark_mode(&mut self, dark_mode: bool, cx: &mut Context<Self>) {
        self.dark_mode = dark_mode;
        cx.notify();
    }

    pub fn clear_search(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.search_input.update(cx, |state, cx| {
            state.set_value("", window, cx);
        });
    }

    fn render_toolbar(&mut self, cx: &mut Context<Self>) -> impl IntoElement {
        h_flex()
            .w_full()
            .min_w_0()
            .gap_2()
            .px_3()
            .pt_2()
            .pb_2()
            .child(Input::new(&self.search_input).w_full().small())
            .child(
                Button::new("sidebar-new-session")
                    .small()
                    .primary()
                    .icon(IconName::Plus)
                    .child("New")
                    .on_click(cx.listener(|_, _, _, cx| {
                        cx.emit(NewSessionClicked);
                    })),
            )
    }

    fn render_session_list(&mut self, cx: &mut Context<Self>) -> AnyElement {
        let theme = cx.theme();

        if self.rows.is_empty() {
            let message = if self.has_sessions {
                "No dreams match your search"
            } else {
                "No dreams recorded yet"
            };

            return v_flex()
                .flex_1()
                .items_center()
                .justify_center()
                .px_4()
                .child(
                    Label::new(message)
                        .text_sm()
                        .text_color(theme.foreground.opacity(0.55)),
                )
                .into_any_element();
        }

        let rows = self.rows.clone();
        let selected = self.selected.clone();

        v_flex()
            .flex_1()
            .min_h_0()
            .child(
                v_virtual_list(
                    cx.entity().clone(),
                    "session-list",
                    self.item_sizes.clone(),
                    move |_this, visible_range, _window, cx| {
                        visible_range
                            .filter_map(|index| rows.get(index).map(|row| (index, row)))
                            .map(|(index, row)| {
                                render_session_row(index, row, selected.as_ref(), cx)
                            })
                            .collect()
                    },
                )
                .w_full()
                .flex_1()
                .track_scroll(&self.scroll_handle),
            )
            .into_any_element()
    }

    fn render_footer(&mut self, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let theme_icon = if self.dark_mode {
            IconName::Sun
        } else {
            IconName::Moon
        };

        h_flex()
            .w_full()
            .min_w_0()
            .items_center()
            .justify_between()
            .gap_2()
            .px_3()
            .py_2()
            .border_t_1()
            .border_color(theme.border)
            .child(
                h_flex()
                    .min_w_0()
                    .gap_2()
                    .items_center()
                    .child(
                        Icon::new(IconName::CircleUser)
                            .size(px(18.))
                            .text_color(theme.foreground),
                    )
                    .child(
                        div()
                            .min_w_0()
                            .truncate()
                            .child(Label::new(self.username.clone()).text_sm()),
                    ),
            )
            .child(
                h_flex()
                    .items_center()
                    .gap_1()
                    .child(
                        Button::new("sidebar-theme-toggle")
                            .ghost()
                            .small()
                            .icon(theme_icon)
                            .on_click(cx.listener(|_, _, _, cx| {
                                cx.emit(ThemeToggleClicked);
                            })),
                    )
                    .child(
                        Button::new("sidebar-logout")
                            .ghost()
                            .small()
                            .child("Log out")
                            .on_click(cx.listener(|_, _, _, cx| {
                                cx.emit(LogoutClicked);
                            })),
                    ),
            )
    }
}

fn render_session_row(
    index: usize,
    row: &SessionRow,
    selected: Option<&SessionId>,
    cx: &mut Context<ChatSidebar>,
) -> AnyElement {
    let select_id = row.id.clone();
    let delete_id = row.id.clone();

    div()
        .w_full()
        .h(px(SESSION_ROW_HEIGHT))
        .px_2()
        .child(
            ListItem::new(("session", index))
                .w_full()
                .h_full()
                .px_3()
                .py_1()
                .rounded_md()
                .selected(selected == Some(&row.id))
                .on_click(cx.listener(move |_, _event: &ClickEvent, _window, cx| {
                    cx.emit(SessionSelected {
                        session_id: select_id.clone(),
                    });
                }))
                .child(
                    h_flex()
                        .w_full()
                        .items_center()
                        .gap_1()
                        .child(
                            div()
                                .flex_1()
                                .min_w_0()
                                .truncate()
                                .child(Label::new(row.title.clone()).text_sm()),
                        )
                        .child(
                            div()
                                .on_mouse_down(MouseButton::Left, |_, _, cx| {
                                    cx.stop_propagation();
                                })
                                .child(
                                    Button::new(("session-delete", index))
                                        .ghost()
                                        .xsmall()
                                        .icon(IconName::Delete)
                                        .on_click(cx.listener(move |_, _, _, cx| {
                                            cx.stop_propagation();
                                            cx.emit(SessionDeleteClicked {
                                                session_id: delete_id.clone(),
                                            });
                                        })),
                                ),
                        ),
                ),
        )
        .into_any_element()
}

impl Render for ChatSidebar {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        v_flex()
            .size_full()
            .min_w_0()
            .overflow_hidden()
            .bg(theme.background)
            .child(self.render_toolbar(cx))
            .child(self.render_session_list(cx))
            .child(self.render_footer(cx))
    }
}
