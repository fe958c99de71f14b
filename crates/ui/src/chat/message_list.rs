use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::rc::Rc;

use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{
    ActiveTheme, VirtualListScrollHandle, h_flex, label::Label, text::TextView, v_flex,
    v_virtual_list,
};
use somnia_chat::{Message, MessageId};

const DEFAULT_CONTENT_WIDTH: Pixels = px(680.);
const LIST_HORIZONTAL_PADDING: Pixels = px(16.);
const USER_BUBBLE_MAX_WIDTH: Pixels = px(540.);
const USER_BUBBLE_PADDING_X: Pixels = px(14.);
const USER_BUBBLE_PADDING_Y: Pixels = px(10.);
const META_ROW_HEIGHT: Pixels = px(16.);
const ROW_GAP: Pixels = px(8.);
const STREAMING_ROW_HEIGHT: Pixels = px(20.);
const TEXT_LINE_HEIGHT: Pixels = px(18.);
const AVERAGE_CHAR_WIDTH: f32 = 7.0;
/// Distance from the bottom that still counts as "at the tail".
const TAIL_SLACK: Pixels = px(24.);
/// Replies above this size render as plain text.
const MARKDOWN_LIMIT_BYTES: usize = 128 * 1024;

const ASSISTANT_NAME: &str = "Dream interpreter";
const WAITING_TEXT: &str = "Waiting for response...";

struct RowHeight {
    fingerprint: u64,
    height: Pixels,
    measured: bool,
}

/// Virtualized transcript of the active session.
///
/// Follows the tail while new text arrives unless the user has scrolled up.
pub struct MessageList {
    messages: Vec<Message>,
    streaming_reply_id: Option<MessageId>,
    item_sizes: Rc<Vec<Size<Pixels>>>,
    heights: HashMap<MessageId, RowHeight>,
    content_width: Option<Pixels>,
    scroll_handle: VirtualListScrollHandle,
    follow_tail: bool,
    scroll_to_tail: bool,
}

impl MessageList {
    pub fn new(_cx: &mut Context<Self>) -> Self {
        Self {
            messages: Vec::new(),
            streaming_reply_id: None,
            item_sizes: Rc::new(Vec::new()),
            heights: HashMap::new(),
            content_width: None,
            scroll_handle: VirtualListScrollHandle::new(),
            follow_tail: true,
            scroll_to_tail: false,
        }
    }

    pub fn set_messages(
        &mut self,
        messages: Vec<Message>,
        streaming_reply_id: Option<MessageId>,
        cx: &mut Context<Self>,
    ) {
        let grew = messages.len() > self.messages.len() || streaming_reply_id.is_some();

        self.messages = messages;
        self.streaming_reply_id = streaming_reply_id;
        self.rebuild_item_sizes();

        if grew && self.follow_tail {
            self.scroll_to_tail = true;
        }
        cx.notify();
    }

    /// Jumps to the bottom and resumes following; used when another session is shown.
    pub fn reset_scroll(&mut self, cx: &mut Context<Self>) {
        self.follow_tail = true;
        self.scroll_to_tail = true;
        cx.notify();
    }

    fn is_streaming(&self, message: &Message) -> bool {
        self.streaming_reply_id.as_ref() == Some(&message.id)
    }

    fn is_at_tail(&self) -> bool {
        let max_offset = self.scroll_handle.max_offset().height;
        if max_offset <= Pixels::ZERO {
            return true;
        }

        // Offsets grow negative when scrolling down.
        let offset = self.scroll_handle.offset().y;
        (offset + max_offset).abs() <= TAIL_SLACK
    }

    fn sync_scroll(&mut self) {
        if !self.scroll_to_tail {
            self.follow_tail = self.is_at_tail();
            return;
        }

        let max_offset = self.scroll_handle.max_offset().height;
        let x = self.scroll_handle.offset().x;
        let y = if max_offset > Pixels::ZERO {
            -max_offset
        } else {
            Pixels::ZERO
        };
        self.scroll_handle.set_offset(point(x, y));
        self.scroll_to_tail = false;
        self.follow_tail = true;
    }

    fn sync_content_width(&mut self) {
        let list_width = self.scroll_handle.bounds().size.width;
        if list_width <= Pixels::ZERO {
            return;
        }

        let width = max_pixels(list_width - LIST_HORIZONTAL_PADDING * 2, px(1.));
        if self
            .content_width
            .is_some_and(|current| !pixels_differ(current, width))
        {
            return;
        }

        self.content_width = Some(width);
        for height in self.heights.values_mut() {
            height.measured = false;
        }
        self.rebuild_item_sizes();
    }

    fn rebuild_item_sizes(&mut self) {
        let width = self.content_width.unwrap_or(DEFAULT_CONTENT_WIDTH);
        let mut live_ids = HashSet::with_capacity(self.messages.len());
        let mut sizes = Vec::with_capacity(self.messages.len());

        for message in &self.messages {
            let streaming = self.is_streaming(message);
            let fingerprint = row_fingerprint(message, streaming);
            let estimate = estimate_row_height(message, streaming, width);

            let height = self.heights.entry(message.id.clone()).or_insert(RowHeight {
                fingerprint,
                height: estimate,
                measured: false,
            });
            if height.fingerprint != fingerprint {
                height.fingerprint = fingerprint;
                height.measured = false;
            }
            if !height.measured {
                height.height = estimate;
            }

            sizes.push(size(px(0.), height.height));
            live_ids.insert(message.id.clone());
        }

        self.heights.retain(|id, _| live_ids.contains(id));
        self.item_sizes = Rc::new(sizes);
    }

    fn measure_rows(&mut self, range: Range<usize>, window: &mut Window, cx: &mut Context<Self>) {
        let width = self.content_width.unwrap_or(DEFAULT_CONTENT_WIDTH);
        let available = size(AvailableSpace::Definite(width), AvailableSpace::MinContent);
        let mut changed = false;

        for index in range {
            let Some(message) = self.messages.get(index).cloned() else {
                continue;
            };
            let fingerprint = row_fingerprint(&message, self.is_streaming(&message));
            if self
                .heights
                .get(&message.id)
                .is_some_and(|height| height.measured && height.fingerprint == fingerprint)
            {
                continue;
            }

            let measured = self
                .render_row(&message, cx)
                .layout_as_root(available, window, cx)
                .height;
            let Some(height) = self.heights.get_mut(&message.id) else {
                continue;
            };
            if !height.measured || pixels_differ(height.height, measured) {
                changed = true;
            }
            height.height = measured;
            height.fingerprint = fingerprint;
            height.measured = true;
        }

        if changed {
            self.item_sizes = Rc::new(
                self.messages
                    .iter()
                    .map(|message| {
                        let height = self
                            .heights
                            .get(&message.id)
                            .map(|height| height.height)
                            .unwrap_or(TEXT_LINE_HEIGHT);
                        size(px(0.), height)
                    })
                    .collect(),
            );
            if self.follow_tail {
                self.scroll_to_tail = true;
            }
            cx.notify();
        }
    }

    fn render_row(&self, message: &Message, cx: &mut Context<Self>) -> AnyElement {
        let theme = cx.theme();
        let time_label = message.local_time_label();

        if message.is_user() {
            let text = if message.text.is_empty() {
                " ".to_string()
            } else {
                message.text.clone()
            };

            return v_flex()
                .w_full()
                .items_end()
                .gap_1()
                .child(
                    div()
                        .max_w(USER_BUBBLE_MAX_WIDTH)
                        .px(USER_BUBBLE_PADDING_X)
                        .py(USER_BUBBLE_PADDING_Y)
                        .rounded_lg()
                        .bg(theme.accent)
                        .text_color(theme.accent_foreground)
                        .child(Label::new(text).text_sm()),
                )
                .when_some(time_label, |column, time| {
                    column.child(
                        Label::new(time)
                            .text_xs()
                            .text_color(theme.foreground.opacity(0.45)),
                    )
                })
                .into_any_element();
        }

        let streaming = self.is_streaming(message);
        let body = if message.text.trim().is_empty() {
            let placeholder = if streaming { WAITING_TEXT } else { "" };
            Label::new(placeholder).text_sm().into_any_element()
        } else if message.text.len() > MARKDOWN_LIMIT_BYTES {
            Label::new(message.text.clone())
                .text_sm()
                .into_any_element()
        } else {
            let id = ElementId::Name(SharedString::from(format!("reply-{}", message.id)));
            TextView::markdown(id, message.text.clone())
                .selectable(true)
                .into_any_element()
        };

        v_flex()
            .w_full()
            .gap_2()
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        Label::new(ASSISTANT_NAME)
                            .text_xs()
                            .text_color(theme.foreground.opacity(0.5)),
                    )
                    .when_some(time_label, |row, time| {
                        row.child(
                            Label::new(time)
                                .text_xs()
                                .text_color(theme.foreground.opacity(0.45)),
                        )
                    }),
            )
            .child(body)
            .when(streaming, |column| {
                column.child(
                    h_flex()
                        .gap_2()
                        .items_center()
                        .child(div().size(px(8.)).rounded_full().bg(theme.primary))
                        .child(
                            Label::new("Streaming")
                                .text_xs()
                                .text_color(theme.foreground.opacity(0.65)),
                        ),
                )
            })
            .into_any_element()
    }

    fn render_empty(&self, cx: &mut Context<Self>) -> AnyElement {
        let theme = cx.theme();

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .gap_2()
            .child(Label::new("Tell me about your dream"))
            .child(
                Label::new("Describe what you saw and I will interpret it.")
                    .text_sm()
                    .text_color(theme.foreground.opacity(0.55)),
            )
            .into_any_element()
    }
}

impl Render for MessageList {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        if self.messages.is_empty() {
            return self.render_empty(cx);
        }

        self.sync_content_width();
        self.sync_scroll();

        v_flex()
            .size_full()
            .min_h_0()
            .child(
                v_virtual_list(
                    cx.entity().clone(),
                    "message-list",
                    self.item_sizes.clone(),
                    |this, visible_range, window, cx| {
                        this.measure_rows(visible_range.clone(), window, cx);
                        visible_range
                            .filter_map(|index| this.messages.get(index).cloned())
                            .map(|message| this.render_row(&message, cx))
                            .collect::<Vec<_>>()
                    },
                )
                .size_full()
                .px_4()
                .py_3()
                .gap_4()
                .track_scroll(&self.scroll_handle),
            )
            .into_any_element()
    }
}

fn row_fingerprint(message: &Message, streaming: bool) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.id.as_str().hash(&mut hasher);
    message.is_user().hash(&mut hasher);
    streaming.hash(&mut hasher);
    message.timestamp.hash(&mut hasher);
    message.text.hash(&mut hasher);
    hasher.finish()
}

fn estimate_row_height(message: &Message, streaming: bool, content_width: Pixels) -> Pixels {
    if message.is_user() {
        let bubble_width = if content_width < USER_BUBBLE_MAX_WIDTH {
            content_width
        } else {
            USER_BUBBLE_MAX_WIDTH
        };
        let text_width = max_pixels(bubble_width - USER_BUBBLE_PADDING_X * 2, px(1.));
        return estimate_text_height(&message.text, text_width)
            + USER_BUBBLE_PADDING_Y * 2
            + ROW_GAP
            + META_ROW_HEIGHT;
    }

    let mut height =
        META_ROW_HEIGHT + ROW_GAP + estimate_text_height(&message.text, content_width);
    if streaming {
        height += ROW_GAP + STREAMING_ROW_HEIGHT;
    }
    height
}

fn estimate_text_height(text: &str, width: Pixels) -> Pixels {
    let chars_per_line = (f32::from(width) / AVERAGE_CHAR_WIDTH).floor().max(1.0) as usize;

    let mut lines: usize = text
        .lines()
        .map(|line| line.chars().count().max(1).div_ceil(chars_per_line))
        .sum();
    if text.ends_with('\n') {
        lines += 1;
    }

    TEXT_LINE_HEIGHT * lines.max(1)
}

fn max_pixels(a: Pixels, b: Pixels) -> Pixels {
    if a >= b { a } else { b }
}

fn pixels_differ(a: Pixels, b: Pixels) -> bool {
    (f32::from(a) - f32::from(b)).abs() > 0.5
}
