pub mod login_view;

pub use login_view::{AuthMode, AuthRequested, LoginView};
