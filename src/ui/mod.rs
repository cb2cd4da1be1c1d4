//! # UI Render Boundary
//!
//! The dashboard components never touch a concrete widget toolkit. They describe
//! what should change through [`RenderSink`], an opaque sink keyed by element id.
//! [`console::ConsoleRenderer`] is the terminal implementation used by the binary;
//! tests use an in-memory recorder.

pub mod common;
pub mod console;

pub use common::{MessageKind, Screen};

use crate::mqtt::message_manager::LogDirection;

/// Render target shared by the Session Manager and the Broker Client.
///
/// Calls are fire-and-forget and must not block. Implementations decide how
/// (and whether) an element id maps onto something visible.
pub trait RenderSink: Send + Sync {
    fn set_text(&self, element_id: &str, value: &str);

    fn set_class(&self, element_id: &str, class_name: &str);

    fn set_enabled(&self, element_id: &str, enabled: bool);

    fn set_visible(&self, element_id: &str, visible: bool);

    fn show_screen(&self, screen: Screen);

    fn append_log_line(&self, text: &str, kind: LogDirection);

    fn clear_log(&self);

    fn show_message(&self, text: &str, kind: MessageKind);

    fn hide_message(&self);

    /// Resets the named form to its empty state.
    fn reset_form(&self, form_id: &str);
}
