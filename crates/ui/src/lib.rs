#![deny(unsafe_code)]

//! Desktop shell for the dream interpretation chat, built on gpui and gpui-component.

pub mod app;
/// Login and registration form.
pub mod auth;
pub mod chat;
/// Layered settings and theme application.
pub mod settings;
