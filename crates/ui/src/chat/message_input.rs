use gpui::*;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    input::{Input, InputEvent, InputState},
    v_flex,
};

use crate::chat::events::{Stop, Submit};

/// Composer: Enter sends, Shift+Enter inserts a newline.
pub struct MessageInput {
    input_state: Entity<InputState>,
    is_streaming: bool,
    // Shift+Enter inserts the newline by hand and gpui still reports PressEnter afterwards.
    swallow_next_enter: bool,
}

impl EventEmitter<Submit> for MessageInput {}
impl EventEmitter<Stop> for MessageInput {}

impl MessageInput {
    pub fn new(window: &mut Window, cx: &mut Context<Self>) -> Self {
        let input_state = cx.new(|cx| {
            InputState::new(window, cx)
                .placeholder("Describe your dream...")
                .auto_grow(3, 10)
        });

        cx.subscribe_in(
            &input_state,
            window,
            |this, _, event: &InputEvent, window, cx| {
                let InputEvent::PressEnter { secondary } = event else {
                    return;
                };

                if *secondary || std::mem::take(&mut this.swallow_next_enter) {
                    return;
                }

                this.submit(window, cx);
            },
        )
        .detach();

        Self {
            input_state,
            is_streaming: false,
            swallow_next_enter: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn set_streaming(&mut self, streaming: bool, cx: &mut Context<Self>) {
        if self.is_streaming == streaming {
            return;
        }

        self.is_streaming = streaming;
        self.swallow_next_enter = false;
        cx.notify();
    }

    pub fn clear(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        self.input_state.update(cx, |state, cx| {
            state.set_value("", window, cx);
        });
        self.swallow_next_enter = false;
    }

    fn insert_newline(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if self.is_streaming {
            return;
        }

        self.swallow_next_enter = true;
        self.input_state.update(cx, |state, cx| {
            state.insert("\n", window, cx);
        });
    }

    fn submit(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if self.is_streaming {
            return;
        }

        let text = self.input_state.read(cx).value().to_string();
        let text = text.trim_end_matches('\n');
        if text.trim().is_empty() {
            // Enter on a blank composer must not leave a stray newline behind.
            self.clear(window, cx);
            return;
        }

        cx.emit(Submit {
            text: text.to_string(),
        });
        self.clear(window, cx);
    }

    fn stop(&mut self, cx: &mut Context<Self>) {
        if self.is_streaming {
            cx.emit(Stop);
        }
    }
}

impl Render for MessageInput {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();

        let action = if self.is_streaming {
            Button::new("composer-stop")
                .small()
                .danger()
                .icon(IconName::CircleX)
                .child("Stop")
                .on_click(cx.listener(|this, _, _window, cx| this.stop(cx)))
                .into_any_element()
        } else {
            Button::new("composer-send")
                .small()
                .primary()
                .icon(IconName::ArrowUp)
                .child("Send")
                .on_click(cx.listener(|this, _, window, cx| this.submit(window, cx)))
                .into_any_element()
        };

        v_flex()
            .gap_2()
            .p_3()
            .bg(theme.background)
            .child(
                div()
                    .w_full()
                    .px_3()
                    .py_2()
                    .rounded_lg()
                    .border_1()
                    .border_color(theme.border)
                    .on_key_down(cx.listener(|this, event: &KeyDownEvent, window, cx| {
                        let keystroke = &event.keystroke;
                        if keystroke.key == "enter" && keystroke.modifiers.shift {
                            this.insert_newline(window, cx);
                        }
                    }))
                    .child(
                        Input::new(&self.input_state)
                            .w_full()
                            .disabled(self.is_streaming),
                    ),
            )
            .child(h_flex().w_full().justify_end().child(action))
    }
}
