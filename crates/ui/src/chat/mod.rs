pub mod events;
pub mod message_input;
pub mod message_list;
pub mod sidebar;
pub mod view;

pub use events::{
    LogoutClicked, NewSessionClicked, SearchChanged, SessionDeleteClicked, SessionSelected, Stop,
    Submit, ThemeToggleClicked,
};
pub use message_input::MessageInput;
pub use message_list::MessageList;
pub use sidebar::{ChatSidebar, SessionRow};
pub use view::{ChatView, STREAM_DEBOUNCE_MS};
