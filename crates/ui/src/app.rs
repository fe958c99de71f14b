use std::path::PathBuf;
use std::sync::Arc;

use gpui::*;
use gpui_component::{
    ActiveTheme, IconName, Sizable,
    button::{Button, ButtonVariants},
    h_flex,
    label::Label,
    v_flex,
};
use gpui_tokio_bridge::Tokio;
use somnia_chat::{AuthBackend, AuthGrant, AuthResult, AuthSession, Credentials};
use somnia_llm::ResponseProvider;
use somnia_storage::KeyValueStore;

use crate::auth::{AuthRequested, LoginView};
use crate::chat::{ChatView, LogoutClicked, ThemeToggleClicked};
use crate::settings::SettingsStore;

#[cfg(target_os = "macos")]
const WINDOW_TOOLBAR_LEFT_SAFE_PADDING: f32 = 78.0;
#[cfg(not(target_os = "macos"))]
const WINDOW_TOOLBAR_LEFT_SAFE_PADDING: f32 = 16.0;

gpui::actions!(somnia, [NewSession, ToggleTheme, Quit]);

pub fn default_themes_path() -> PathBuf {
    PathBuf::from("./themes")
}

/// Key-value store shared by chat history and the current-user record.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Long-lived collaborators built once in `main`.
#[derive(Clone)]
pub struct AppServices {
    pub store: SharedStore,
    pub provider: Option<Arc<dyn ResponseProvider>>,
    /// Why `provider` is missing, shown above the transcript.
    pub provider_error: Option<SharedString>,
    pub auth_backend: Arc<dyn AuthBackend>,
}

fn window_toolbar_height(window: &Window) -> Pixels {
    (1.75 * window.rem_size()).max(px(34.0))
}

/// Root view: the login form until someone signs in, then the chat.
pub struct SomniaShell {
    services: AppServices,
    settings: SettingsStore,
    auth: AuthSession<SharedStore>,
    login_view: Option<Entity<LoginView>>,
    chat_view: Option<Entity<ChatView>>,
    auth_task: Option<Task<()>>,
    view_subscriptions: Vec<Subscription>,
    title_bar_should_move: bool,
}

impl SomniaShell {
    pub fn new(
        services: AppServices,
        settings: SettingsStore,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) -> Self {
        let mut auth = AuthSession::new(services.store.clone(), services.auth_backend.clone());
        auth.init();
        let restored_user = auth.current_user().map(|user| user.username.clone());

        let mut shell = Self {
            services,
            settings,
            auth,
            login_view: None,
            chat_view: None,
            auth_task: None,
            view_subscriptions: Vec::new(),
            title_bar_should_move: false,
        };

        match restored_user {
            Some(username) => {
                tracing::info!(username = %username, "restored signed-in user");
                shell.show_chat(&username, window, cx);
            }
            None => shell.show_login(window, cx),
        }
        shell
    }

    fn show_login(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let login_view = cx.new(|cx| LoginView::new(window, cx));
        self.view_subscriptions = vec![cx.subscribe_in(
            &login_view,
            window,
            |this, _, event: &AuthRequested, window, cx| {
                this.request_auth(event.credentials.clone(), window, cx);
            },
        )];

        self.chat_view = None;
        self.login_view = Some(login_view);
        cx.notify();
    }

    fn show_chat(&mut self, username: &str, window: &mut Window, cx: &mut Context<Self>) {
        let dark_mode = self.settings.settings().theme_mode.is_dark();
        let services = self.services.clone();
        let chat_view =
            cx.new(|cx| ChatView::new(&services, username, dark_mode, window, cx));

        self.view_subscriptions = vec![
            cx.subscribe_in(
                &chat_view,
                window,
                |this, _, _event: &LogoutClicked, window, cx| {
                    this.logout(window, cx);
                },
            ),
            cx.subscribe_in(
                &chat_view,
                window,
                |this, _, _event: &ThemeToggleClicked, window, cx| {
                    this.toggle_theme(window, cx);
                },
            ),
        ];

        self.login_view = None;
        self.chat_view = Some(chat_view);
        cx.notify();
    }

    fn request_auth(
        &mut self,
        credentials: Credentials,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        if self.auth_task.is_some() {
            return;
        }

        let request = Tokio::spawn(cx, self.auth.request(&credentials));

        self.auth_task = Some(cx.spawn_in(window, async move |this, cx| {
            let outcome = request.await;
            let _ = this.update_in(cx, |this, window, cx| match outcome {
                Ok(result) => this.finish_auth(credentials, result, window, cx),
                Err(error) => {
                    tracing::error!(error = ?error, "auth request task failed");
                    this.auth_task = None;
                    if let Some(login_view) = this.login_view.as_ref() {
                        login_view.update(cx, |view, cx| view.set_busy(false, cx));
                    }
                }
            });
        }));
    }

    fn finish_auth(
        &mut self,
        credentials: Credentials,
        result: AuthResult<AuthGrant>,
        window: &mut Window,
        cx: &mut Context<Self>,
    ) {
        self.auth_task = None;

        let accepted = result.and_then(|grant| {
            self.auth
                .accept(credentials, grant)
                .map(|user| user.username.clone())
        });

        match accepted {
            Ok(username) => self.show_chat(&username, window, cx),
            Err(error) => {
                tracing::warn!(error = %error, "authentication failed");
                if let Some(login_view) = self.login_view.as_ref() {
                    login_view.update(cx, |view, cx| view.show_error(&error, cx));
                }
            }
        }
    }

    fn logout(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if let Some(chat_view) = self.chat_view.as_ref() {
            chat_view.update(cx, |view, cx| view.shutdown(cx));
        }

        if let Err(error) = self.auth.logout() {
            tracing::warn!(error = %error, "failed to clear the current user record");
        }
        self.show_login(window, cx);
    }

    fn new_session(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        if let Some(chat_view) = self.chat_view.as_ref() {
            chat_view.update(cx, |view, cx| view.create_session(window, cx));
        }
    }

    fn toggle_theme(&mut self, window: &mut Window, cx: &mut Context<Self>) {
        let mut settings = (*self.settings.settings()).clone().with_toggled_theme_mode();
        // A named theme pins its own mode; toggling falls back to the built-in themes.
        settings.theme_name.clear();
        settings.apply_theme(Some(window), cx);

        let dark_mode = settings.theme_mode.is_dark();
        if let Err(error) = self
            .settings
            .update_theme(settings.theme_mode, &settings.theme_name)
        {
            tracing::warn!(error = %error, "failed to persist theme mode");
        }

        if let Some(chat_view) = self.chat_view.as_ref() {
            chat_view.update(cx, |view, cx| view.set_dark_mode(dark_mode, cx));
        }
        cx.notify();
    }

    fn render_top_bar(
        &self,
        window: &Window,
        toolbar_height: Pixels,
        cx: &Context<Self>,
    ) -> impl IntoElement {
        let theme = cx.theme();
        let title = match self.chat_view.as_ref() {
            Some(chat_view) => format!("Somnia · {}", chat_view.read(cx).username()),
            None => "Somnia".to_string(),
        };

        h_flex()
            .id("app-top-bar")
            .window_control_area(WindowControlArea::Drag)
            .on_mouse_down_out(cx.listener(|this, _, _window, _cx| {
                this.title_bar_should_move = false;
            }))
            .on_mouse_up(
                MouseButton::Left,
                cx.listener(|this, _, _window, _cx| {
                    this.title_bar_should_move = false;
                }),
            )
            .on_mouse_down(
                MouseButton::Left,
                cx.listener(|this, _, _window, _cx| {
                    this.title_bar_should_move = true;
                }),
            )
            .on_mouse_move(cx.listener(|this, _, window, _cx| {
                if this.title_bar_should_move {
                    this.title_bar_should_move = false;
                    window.start_window_move();
                }
            }))
            .w_full()
            .h(toolbar_height)
            .flex_shrink_0()
            .pl(px(WINDOW_TOOLBAR_LEFT_SAFE_PADDING))
            .pr_4()
            .items_center()
            .justify_between()
            .bg(theme.background)
            .border_b_1()
            .border_color(theme.border)
            .child(
                Label::new(title)
                    .text_sm()
                    .text_color(theme.muted_foreground),
            )
            .child(self.render_linux_window_controls(window, cx))
    }

    fn render_linux_window_controls(&self, window: &Window, cx: &Context<Self>) -> AnyElement {
        #[cfg(target_os = "linux")]
        {
            let maximize_icon = if window.is_maximized() {
                IconName::WindowRestore
            } else {
                IconName::WindowMaximize
            };

            h_flex()
                .id("linux-window-controls")
                .items_center()
                // Keep clicks on the controls out of the title bar drag handling.
                .on_mouse_down(MouseButton::Left, |_, _, cx| cx.stop_propagation())
                .gap_2()
                .child(
                    Button::new("linux-window-minimize")
                        .ghost()
                        .small()
                        .icon(IconName::WindowMinimize)
                        .on_click(cx.listener(|_, _, window, _| window.minimize_window())),
                )
                .child(
                    Button::new("linux-window-maximize")
                        .ghost()
                        .small()
                        .icon(maximize_icon)
                        .on_click(cx.listener(|_, _, window, _| window.zoom_window())),
                )
                .child(
                    Button::new("linux-window-close")
                        .ghost()
                        .small()
                        .icon(IconName::WindowClose)
                        .on_click(cx.listener(|_, _, window, _| window.remove_window())),
                )
                .into_any_element()
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (window, cx);
            div().into_any_element()
        }
    }
}

impl Render for SomniaShell {
    fn render(&mut self, window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let theme = cx.theme();
        let toolbar_height = window_toolbar_height(window);

        let body = if self.auth.is_loading() {
            div().size_full().into_any_element()
        } else if let Some(chat_view) = self.chat_view.clone() {
            chat_view.into_any_element()
        } else if let Some(login_view) = self.login_view.clone() {
            login_view.into_any_element()
        } else {
            div().size_full().into_any_element()
        };

        v_flex()
            .id("somnia-shell")
            .size_full()
            .bg(theme.background)
            .on_action(cx.listener(|this, _: &NewSession, window, cx| {
                this.new_session(window, cx);
            }))
            .on_action(cx.listener(|this, _: &ToggleTheme, window, cx| {
                this.toggle_theme(window, cx);
            }))
            .child(self.render_top_bar(window, toolbar_height, cx))
            .child(
                div()
                    .id("somnia-shell-body")
                    .flex_1()
                    .min_h_0()
                    .overflow_hidden()
                    .child(body),
            )
    }
}
