use somnia_chat::SessionId;

/// Emitted when a sidebar row is clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSelected {
    pub session_id: SessionId,
}

/// Emitted by the delete button on a sidebar row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDeleteClicked {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSessionClicked;

/// Emitted whenever the sidebar search text changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchChanged {
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutClicked;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeToggleClicked;

/// Emitted when the user sends a dream description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub text: String,
}

/// Emitted when the user asks to stop the in-flight reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop;
