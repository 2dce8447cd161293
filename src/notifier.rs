#[cfg(any(target_os = "linux", target_os = "macos"))]
use crate::collectors::shell::run_command;
#[cfg(target_os = "windows")]
use crate::collectors::shell::run_powershell;
use crate::collectors::shell::CommandError;
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Command(#[from] CommandError),
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    #[cfg_attr(target_os = "windows", allow(dead_code))]
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    #[cfg(target_os = "windows")]
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        // Toasts need a registered AppUserModelID; PowerShell's own id always is.
        const POWERSHELL_APP_ID: &str =
            "{1AC14E77-02E7-4E5D-B744-2EB1AE5198B7}\\WindowsPowerShell\\v1.0\\powershell.exe";
        let script = format!(
            "[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] > $null; \
             $t = [Windows.UI.Notifications.ToastNotificationManager]::GetTemplateContent([Windows.UI.Notifications.ToastTemplateType]::ToastText02); \
             $x = $t.GetElementsByTagName('text'); \
             $x.Item(0).AppendChild($t.CreateTextNode('{title}')) > $null; \
             $x.Item(1).AppendChild($t.CreateTextNode('{message}')) > $null; \
             $n = [Windows.UI.Notifications.ToastNotification]::new($t); \
             $n.ExpirationTime = [DateTimeOffset]::Now.AddSeconds({secs}); \
             [Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('{app}').Show($n)",
            title = ps_quote(&notification.title),
            message = ps_quote(&notification.message),
            secs = notification.duration.as_secs().max(1),
            app = POWERSHELL_APP_ID,
        );
        run_powershell(&script)?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let millis = notification.duration.as_millis().to_string();
        run_command(
            "notify-send",
            &[
                "-a",
                self.app_name.as_str(),
                "-t",
                millis.as_str(),
                notification.title.as_str(),
                notification.message.as_str(),
            ],
        )?;
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let script = format!(
            "display notification \"{}\" with title \"{}\" subtitle \"{}\"",
            as_quote(&notification.message),
            as_quote(&notification.title),
            as_quote(&self.app_name),
        );
        run_command("osascript", &["-e", &script])?;
        Ok(())
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(CommandError::Unsupported("desktop notifications").into())
    }
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn ps_quote(text: &str) -> String {
    text.replace('\'', "''")
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn as_quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
    duration: Duration,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        capacity: usize,
        duration: Duration,
        metrics: Arc<Metrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity.max(1));
        let worker_metrics = metrics.clone();
        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let notifier = notifier.clone();
                let result =
                    tokio::task::spawn_blocking(move || notifier.notify(&notification)).await;
                match result {
                    Ok(Ok(())) => {
                        worker_metrics.inc_notification("sent");
                        debug!("notification delivered");
                    }
                    Ok(Err(err)) => {
                        worker_metrics.inc_notification("failed");
                        warn!(error = %err, "desktop notification failed");
                    }
                    Err(err) => {
                        worker_metrics.inc_notification("failed");
                        warn!(error = %err, "desktop notification task panicked");
                    }
                }
            }
        });

        (
            Self {
                tx,
                duration,
                metrics,
            },
            worker,
        )
    }

    pub fn send(&self, title: impl Into<String>, message: impl Into<String>) {
        let notification = Notification {
            title: title.into(),
            message: message.into(),
            duration: self.duration,
        };
        if let Err(err) = self.tx.try_send(notification) {
            self.metrics.inc_notification("dropped");
            warn!(error = %err, "notification dropped");
        }
    }
}
