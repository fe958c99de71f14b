use snafu::Snafu;
use somnia_storage::StorageError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("failed to encode history for '{username}' on `{stage}`: {source}"))]
    EncodeHistory {
        stage: &'static str,
        username: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to access '{key}' on `{stage}`: {source}"))]
    HistoryStorage {
        stage: &'static str,
        key: String,
        source: StorageError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("{field} must not be empty"))]
    BlankCredential {
        stage: &'static str,
        field: &'static str,
    },
    #[snafu(display("failed to build auth client on `{stage}`: {source}"))]
    BuildAuthClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("auth request to {url} failed on `{stage}`: {source}"))]
    AuthTransport {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("auth server rejected the request ({status}): {detail}"))]
    Rejected {
        stage: &'static str,
        status: u16,
        detail: String,
    },
    #[snafu(display("auth response carried no token"))]
    MissingToken { stage: &'static str },
    #[snafu(display("failed to encode the current user on `{stage}`: {source}"))]
    EncodeUser {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to access the current user on `{stage}`: {source}"))]
    UserStorage {
        stage: &'static str,
        source: StorageError,
    },
}

pub type AuthResult<T> = Result<T, AuthError>;
