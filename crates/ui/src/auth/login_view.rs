use gpui::prelude::FluentBuilder as _;
use gpui::*;
use gpui_component::{
    ActiveTheme, Sizable,
    button::{Button, ButtonVariants},
    input::{Input, InputEvent, InputState},
    label::Label,
    v_flex,
};
use somnia_chat::{AuthError, Credentials};

const FORM_WIDTH: Pixels = px(360.);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Register,
}

impl AuthMode {
    fn title(self) -> &'static str {
        match self {
            Self::Login => "Sign in",
            Self::Register => "Create an account",
        }
    }

    fn toggled(self) -> Self {
        match self {
            Self::Login => Self::Register,
            Self::Register => Self::Login,
        }
    }
}

/// Emitted with locally validated credentials; the shell talks to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequested {
    pub credentials: Credentials,
}

pub struct LoginView {
    mode: AuthMode,
    username_input: Entity<InputState>,
    email_input: Entity<InputState>,
    password_input: Entity<InputState>,
    error: Option<SharedString>,
    busy: bool,
}

impl EventEmitter<AuthRequested> for LoginView {}

impl LoginView {
    pub fn new(window: &mut Window, cx: &mut Context<Self>) -> Self {
        let username_input = cx.new(|cx| InputState::new(window, cx).placeholder("Username"));
        let email_input = cx.new(|cx| InputState::new(window, cx).placeholder("Email"));
        let password_input = cx.new(|cx| {
            InputState::new(window, cx)
                .placeholder("Password")
                .masked(true)
        });

        cx.subscribe_in(
            &password_input,
            window,
            |this, _, event: &InputEvent, _window, cx| {
                if let InputEvent::PressEnter { .. } = event {
                    this.submit(cx);
                }
            },
        )
        .detach();

        Self {
            mode: AuthMode::Login,
            username_input,
            email_input,
            password_input,
            error: None,
            busy: false,
        }
    }

    pub fn set_busy(&mut self, busy: bool, cx: &mut Context<Self>) {
        self.busy = busy;
        cx.notify();
    }

    pub fn show_error(&mut self, error: &AuthError, cx: &mut Context<Self>) {
        self.busy = false;
        self.error = Some(error.user_message().into());
        cx.notify();
    }

    fn toggle_mode(&mut self, cx: &mut Context<Self>) {
        if self.busy {
            return;
        }

        self.mode = self.mode.toggled();
        self.error = None;
        cx.notify();
    }

    fn submit(&mut self, cx: &mut Context<Self>) {
        if self.busy {
            return;
        }

        let username = self.username_input.read(cx).value().to_string();
        let password = self.password_input.read(cx).value().to_string();
        let credentials = match self.mode {
            AuthMode::Login => Credentials::login(&username, &password),
            AuthMode::Register => {
                let email = self.email_input.read(cx).value().to_string();
                Credentials::register(&username, &email, &password)
            }
        };

        match credentials {
            Ok(credentials) => {
                self.error = None;
                self.busy = true;
                cx.emit(AuthRequested { credentials });
                cx.notify();
            }
            Err(error) => self.show_error(&error, cx),
        }
    }
}

impl Render for LoginView {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let registering = self.mode == AuthMode::Register;
        let submit_label = if self.busy {
            "Please wait..."
        } else if registering {
            "Register"
        } else {
            "Log in"
        };
        let toggle_label = if registering {
            "Already have an account? Sign in"
        } else {
            "No account yet? Register"
        };

        v_flex()
            .id("login-view")
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(
                v_flex()
                    .w(FORM_WIDTH)
                    .gap_3()
                    .p_6()
                    .rounded_lg()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.muted)
                    .child(Label::new("Somnia").text_xl())
                    .child(
                        Label::new(self.mode.title())
                            .text_sm()
                            .text_color(theme.muted_foreground),
                    )
                    .child(Input::new(&self.username_input).disabled(self.busy))
                    .when(registering, |form| {
                        form.child(Input::new(&self.email_input).disabled(self.busy))
                    })
                    .child(Input::new(&self.password_input).disabled(self.busy))
                    .when_some(self.error.clone(), |form, error| {
                        form.child(Label::new(error).text_sm().text_color(theme.danger))
                    })
                    .child(
                        Button::new("login-submit")
                            .primary()
                            .loading(self.busy)
                            .child(submit_label)
                            .on_click(cx.listener(|this, _, _window, cx| this.submit(cx))),
                    )
                    .child(
                        Button::new("login-toggle-mode")
                            .ghost()
                            .small()
                            .child(toggle_label)
                            .on_click(cx.listener(|this, _, _window, cx| this.toggle_mode(cx))),
                    ),
            )
    }
}
