use std::sync::Arc;

use gpui::*;
use gpui_component::{Root, ThemeRegistry};
use somnia::app::{
    AppServices, NewSession, Quit, SharedStore, SomniaShell, ToggleTheme, default_themes_path,
};
use somnia::settings::{AppSettings, SettingsStore};
use somnia_chat::{AuthBackend, HttpAuthBackend};
use somnia_llm::create_provider;
use somnia_storage::{MemoryKeyValueStore, SqliteKeyValueStore};

/// Opens the on-disk store, falling back to memory so the app still starts.
fn open_store(settings: &AppSettings) -> SharedStore {
    let path = settings.resolved_storage_path();
    match SqliteKeyValueStore::open_blocking(&path.to_string_lossy()) {
        Ok(store) => {
            tracing::info!(path = %path.display(), "opened chat storage");
            Arc::new(store)
        }
        Err(error) => {
            tracing::error!(
                path = %path.display(),
                error = %error,
                "failed to open chat storage, history will not survive a restart"
            );
            Arc::new(MemoryKeyValueStore::new())
        }
    }
}

fn build_services(settings: &AppSettings) -> Option<AppServices> {
    let store = open_store(settings);

    let (provider, provider_error) = match create_provider(settings.to_provider_config()) {
        Ok(provider) => {
            tracing::info!(provider = provider.id(), "initialized response provider");
            (Some(provider), None)
        }
        Err(error) => {
            tracing::error!(error = %error, "failed to initialize response provider");
            (None, Some(error.to_string().into()))
        }
    };

    let auth_backend: Arc<dyn AuthBackend> =
        match HttpAuthBackend::new(settings.backend_url.clone()) {
            Ok(backend) => Arc::new(backend),
            Err(error) => {
                tracing::error!(error = %error, "failed to build auth client");
                return None;
            }
        };

    Some(AppServices {
        store,
        provider,
        provider_error,
        auth_backend,
    })
}

fn main() {
    tracing_subscriber::fmt::init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    tracing::debug!(path = %settings_store.config_path().display(), "loaded settings");

    let Some(services) = build_services(&settings) else {
        return;
    };

    let app = Application::new().with_assets(gpui_component_assets::Assets);

    app.run(move |cx| {
        gpui_tokio_bridge::init(cx);
        gpui_component::init(cx);

        let theme_settings = settings.clone();
        if let Err(error) = ThemeRegistry::watch_dir(default_themes_path(), cx, move |cx| {
            theme_settings.apply_theme(None, cx);
        }) {
            tracing::warn!(
                error = %error,
                "failed to watch themes directory, using built-in themes"
            );
            settings.apply_theme(None, cx);
        }

        cx.on_action(|_: &Quit, cx| {
            cx.quit();
        });

        cx.bind_keys([
            KeyBinding::new("cmd-q", Quit, None),
            KeyBinding::new("cmd-n", NewSession, None),
            KeyBinding::new("cmd-shift-t", ToggleTheme, None),
        ]);

        cx.spawn(async move |cx| {
            cx.update(|cx| {
                let options = WindowOptions {
                    window_bounds: Some(WindowBounds::Windowed(Bounds::centered(
                        None,
                        size(px(1100.), px(760.)),
                        cx,
                    ))),
                    titlebar: Some(TitlebarOptions {
                        appears_transparent: true,
                        traffic_light_position: Some(point(px(9.), px(9.))),
                        ..Default::default()
                    }),
                    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
                    window_decorations: Some(WindowDecorations::Client),
                    #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
                    window_decorations: None,
                    ..Default::default()
                };

                let opened = cx.open_window(options, |window, cx| {
                    let shell =
                        cx.new(|cx| SomniaShell::new(services, settings_store, window, cx));
                    cx.new(|cx| Root::new(shell, window, cx))
                });
                if let Err(error) = opened {
                    tracing::error!(error = %error, "failed to open main window");
                    cx.quit();
                    return;
                }

                cx.activate(true);
            })
        })
        .detach();
    });
}
