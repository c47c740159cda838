//! Completion notifications
//!
//! Notifications are fire-and-forget. A failing notifier is logged and never
//! changes the outcome of the job that triggered it.

use crate::error::Result;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// A desktop-style notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub timeout: Duration,
    /// Icon relative to the application resource directory
    pub icon: Option<PathBuf>,
    pub app_name: String,
}

/// Application icon shipped next to the binary
pub const APP_ICON: &str = "resources/efi-icon.ico";

impl Notification {
    /// Notification emitted after a successful job
    #[must_use]
    pub fn background_removed() -> Self {
        Self {
            title: "Background removed".to_string(),
            message: "The image has been processed!".to_string(),
            timeout: Duration::from_secs(10),
            icon: Some(PathBuf::from(APP_ICON)),
            app_name: "EFI".to_string(),
        }
    }
}

/// Delivery channel for notifications
pub trait Notifier: Send + Sync {
    /// Deliver a notification
    ///
    /// # Errors
    /// - Delivery failed; callers log and ignore this
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        log::info!(
            "🔔 [{}] {}: {}",
            notification.app_name,
            notification.title,
            notification.message
        );
        if let Some(icon) = &notification.icon {
            log::debug!("Notification icon: {}", icon.display());
        }
        Ok(())
    }
}

/// Notifier that drops every notification
#[derive(Debug, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Notifier that keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_removed_notification() {
        let notification = Notification::background_removed();
        assert_eq!(notification.title, "Background removed");
        assert_eq!(notification.message, "The image has been processed!");
        assert_eq!(notification.timeout, Duration::from_secs(10));
        assert_eq!(notification.icon, Some(PathBuf::from("resources/efi-icon.ico")));
        assert_eq!(notification.app_name, "EFI");
    }

    #[test]
    fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        assert!(notifier.sent().is_empty());

        notifier.notify(&Notification::background_removed()).unwrap();
        LogNotifier.notify(&Notification::background_removed()).unwrap();
        NoOpNotifier.notify(&Notification::background_removed()).unwrap();

        assert_eq!(notifier.sent().len(), 1);
    }
}
