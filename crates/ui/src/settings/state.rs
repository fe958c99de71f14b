use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment, Provider,
    providers::{Env, Format, Json, Serialized},
};
use gpui::*;
use gpui_component::{Theme, ThemeMode, ThemeRegistry};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use somnia_llm::{DEFAULT_ENDPOINT_BASE_URL, ENDPOINT_PROVIDER_ID, ProviderConfig};
use somnia_storage::DEFAULT_STORAGE_DB_FILE_NAME;

pub const SETTINGS_DIRECTORY_NAME: &str = "somnia";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "SOMNIA_";

/// Values the environment may supply when the settings file leaves them out.
const ENV_FALLBACK_KEYS: [&str; 5] = [
    "provider_id",
    "backend_url",
    "model_base_url",
    "api_key",
    "model_id",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    /// Somnia backend: `/ai/ollama` replies and `/auth/*`.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// OpenAI-compatible API root for the rig provider; unset means the public OpenAI API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
    #[serde(
        default = "default_theme_mode",
        serialize_with = "serialize_theme_mode",
        deserialize_with = "deserialize_theme_mode"
    )]
    pub theme_mode: ThemeMode,
    #[serde(default)]
    pub theme_name: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            backend_url: default_backend_url(),
            model_base_url: None,
            api_key: String::new(),
            model_id: None,
            storage_path: None,
            theme_mode: default_theme_mode(),
            theme_name: String::new(),
        }
    }
}

impl AppSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(
            &self.provider_id,
            &self.backend_url,
            &self.api_key,
            self.model_id.clone(),
        )
        .with_model_base_url(self.model_base_url.clone())
    }

    /// Sqlite file for chat history and the current user.
    pub fn resolved_storage_path(&self) -> PathBuf {
        if let Some(path) = &self.storage_path {
            return path.clone();
        }

        dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".somnia"))
            .join(DEFAULT_STORAGE_DB_FILE_NAME)
    }

    pub fn with_toggled_theme_mode(mut self) -> Self {
        self.theme_mode = if self.theme_mode.is_dark() {
            ThemeMode::Light
        } else {
            ThemeMode::Dark
        };
        self
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = self.provider_id.trim().to_string();
        if self.provider_id.is_empty() {
            self.provider_id = default_provider_id();
        }

        self.backend_url = self.backend_url.trim().trim_end_matches('/').to_string();
        if self.backend_url.is_empty() {
            self.backend_url = default_backend_url();
        }
        self.model_base_url = self
            .model_base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        self.api_key = self.api_key.trim().to_string();
        self.model_id = self
            .model_id
            .map(|model_id| model_id.trim().to_string())
            .filter(|model_id| !model_id.is_empty());
        self.storage_path = self
            .storage_path
            .filter(|path| !path.as_os_str().is_empty());
        self.theme_name = self.theme_name.trim().to_string();
        self
    }

    pub fn apply_theme(&self, window: Option<&mut Window>, cx: &mut App) {
        if let Some(theme_config) = ThemeRegistry::global(cx)
            .themes()
            .get(&SharedString::from(self.theme_name.clone()))
            .cloned()
        {
            let mode = theme_config.mode;
            let theme = Theme::global_mut(cx);
            if mode.is_dark() {
                theme.dark_theme = theme_config;
            } else {
                theme.light_theme = theme_config;
            }
            Theme::change(mode, window, cx);
            return;
        }

        Theme::change(self.theme_mode, window, cx);
    }
}

/// Layered settings: the JSON file wins, `SOMNIA_*` variables fill gaps, defaults fill the rest.
///
/// Only values the user changed from inside the app are ever written back, so
/// environment values and defaults stay out of the file.
pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".somnia"))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        Self::with_env(
            config_path,
            Env::prefixed(SETTINGS_ENV_PREFIX).only(&ENV_FALLBACK_KEYS),
        )
    }

    fn with_env(config_path: PathBuf, env: impl Provider) -> Self {
        let settings = Self::load_layers(&config_path, env);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Records the theme choice in the file, leaving every other key as the user wrote it.
    pub fn update_theme(
        &self,
        theme_mode: ThemeMode,
        theme_name: &str,
    ) -> Result<(), SettingsError> {
        let theme_name = theme_name.trim();

        let mut file_values = self.read_file_values()?;
        file_values.insert("theme_mode".to_string(), Value::from(theme_mode.name()));
        if theme_name.is_empty() {
            file_values.remove("theme_name");
        } else {
            file_values.insert("theme_name".to_string(), Value::from(theme_name));
        }
        self.write_file_values(&file_values)?;

        let mut settings = (*self.settings()).clone();
        settings.theme_mode = theme_mode;
        settings.theme_name = theme_name.to_string();
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    fn load_layers(path: &Path, env: impl Provider) -> AppSettings {
        let figment = Figment::new()
            .merge(Json::file(path))
            .join(env)
            .join(Serialized::defaults(AppSettings::default()));

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                AppSettings::default()
            }
        }
    }

    /// A missing file reads as empty; an unreadable one is an error so it is never replaced.
    fn read_file_values(&self) -> Result<Map<String, Value>, SettingsError> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(SettingsError::ReadFile {
                    stage: "read-settings-file",
                    path: self.config_path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).context(ParseFileSnafu {
            stage: "parse-settings-file",
            path: self.config_path.clone(),
        })
    }

    fn write_file_values(&self, file_values: &Map<String, Value>) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(file_values).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read settings file at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("settings file at {path:?} is not a JSON object on `{stage}`: {source}"))]
    ParseFile {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    ENDPOINT_PROVIDER_ID.to_string()
}

fn default_backend_url() -> String {
    DEFAULT_ENDPOINT_BASE_URL.to_string()
}

fn default_theme_mode() -> ThemeMode {
    ThemeMode::Dark
}

fn serialize_theme_mode<S>(value: &ThemeMode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.name())
}

fn deserialize_theme_mode<'de, D>(deserializer: D) -> Result<ThemeMode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(if value.trim().eq_ignore_ascii_case("light") {
        ThemeMode::Light
    } else {
        ThemeMode::Dark
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn settings_path(directory: &tempfile::TempDir) -> PathBuf {
        directory.path().join("somnia").join(SETTINGS_FILE_NAME)
    }

    fn env_layer(values: &[(&str, &str)]) -> Serialized<BTreeMap<String, String>> {
        Serialized::defaults(
            values
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    fn read_json(path: &Path) -> Map<String, Value> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn file_values_are_normalized_over_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let path = settings_path(&directory);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"provider_id": "  ", "backend_url": "http://dreams.local:9000/", "model_base_url": " ", "model_id": " ", "theme_mode": "light"}"#,
        )
        .unwrap();

        let settings = SettingsStore::with_env(path, env_layer(&[])).settings();
        assert_eq!(settings.provider_id, ENDPOINT_PROVIDER_ID);
        assert_eq!(settings.backend_url, "http://dreams.local:9000");
        assert_eq!(settings.model_base_url, None);
        assert_eq!(settings.model_id, None);
        assert_eq!(settings.theme_mode, ThemeMode::Light);
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let path = settings_path(&directory);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"storage_path": 42, "theme_name": ["x"]}"#).unwrap();

        let settings = SettingsStore::with_env(path, env_layer(&[])).settings();
        assert_eq!(settings.backend_url, DEFAULT_ENDPOINT_BASE_URL);
        assert!(settings.theme_name.is_empty());
    }

    #[test]
    fn environment_fills_gaps_left_by_the_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = settings_path(&directory);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"backend_url": "http://file.local"}"#).unwrap();

        let settings = SettingsStore::with_env(
            path,
            env_layer(&[("backend_url", "http://env.local"), ("api_key", "sk-env")]),
        )
        .settings();
        assert_eq!(settings.backend_url, "http://file.local");
        assert_eq!(settings.api_key, "sk-env");
    }

    #[test]
    fn theme_toggle_writes_only_the_theme() {
        let directory = tempfile::tempdir().unwrap();
        let path = settings_path(&directory);
        let env = [("backend_url", "http://env.local"), ("api_key", "sk-env")];
        let store = SettingsStore::with_env(path.clone(), env_layer(&env));

        let toggled = (*store.settings()).clone().with_toggled_theme_mode();
        store.update_theme(toggled.theme_mode, "").unwrap();

        let written = read_json(&path);
        assert_eq!(written.keys().collect::<Vec<_>>(), vec!["theme_mode"]);
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.settings().theme_mode, toggled.theme_mode);
        assert_eq!(store.settings().api_key, "sk-env");

        // A later environment change still applies after the toggle.
        let reloaded = SettingsStore::with_env(
            path,
            env_layer(&[("backend_url", "http://moved.local")]),
        )
        .settings();
        assert_eq!(reloaded.backend_url, "http://moved.local");
        assert_eq!(reloaded.theme_mode, toggled.theme_mode);
        assert!(reloaded.api_key.is_empty());
    }

    #[test]
    fn theme_update_keeps_existing_file_keys() {
        let directory = tempfile::tempdir().unwrap();
        let path = settings_path(&directory);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"model_id": "gpt-oss:20b", "theme_name": "Ayu"}"#).unwrap();

        let store = SettingsStore::with_env(path.clone(), env_layer(&[]));
        store.update_theme(ThemeMode::Light, "").unwrap();

        let written = read_json(&path);
        assert_eq!(written.get("model_id"), Some(&Value::from("gpt-oss:20b")));
        assert_eq!(written.get("theme_mode"), Some(&Value::from(ThemeMode::Light.name())));
        assert!(!written.contains_key("theme_name"));
    }

    #[test]
    fn malformed_file_is_not_replaced() {
        let directory = tempfile::tempdir().unwrap();
        let path = settings_path(&directory);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2").unwrap();

        let store = SettingsStore::with_env(path.clone(), env_layer(&[]));
        assert!(matches!(
            store.update_theme(ThemeMode::Light, ""),
            Err(SettingsError::ParseFile { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2");
    }

    #[test]
    fn backend_and_model_urls_stay_separate() {
        let settings = AppSettings {
            provider_id: "openai".to_string(),
            model_base_url: Some("https://api.example.com/v1".to_string()),
            api_key: "sk-test".to_string(),
            model_id: Some("gpt-oss:20b".to_string()),
            ..AppSettings::default()
        };

        let config = settings.to_provider_config();
        assert_eq!(config.provider_id, "openai");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT_BASE_URL);
        assert_eq!(config.model_base_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model_id.as_deref(), Some("gpt-oss:20b"));
    }
}
