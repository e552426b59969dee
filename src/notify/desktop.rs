//! Desktop notifications through `notify-send`
//!
//! Each notification replaces the previous one so rapid toggles do not
//! pile up on screen. Notifications are shown one at a time from a queue,
//! so the id of the previous one is known before the next goes out.

use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{message, Notifier};

const NOTIFY_SEND: &str = "notify-send";
const APP_NAME: &str = "mictoggle";
const TIMEOUT_MS: u32 = 1000;
const ICON_MUTED: &str = "microphone-sensitivity-muted-symbolic";
const ICON_UNMUTED: &str = "audio-input-microphone-symbolic";

/// Shows a transient notification for every confirmed mute change
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    queue: mpsc::UnboundedSender<bool>,
}

impl DesktopNotifier {
    /// Start the delivery task on the current runtime
    pub fn new() -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(deliver(pending, show));
        Self { queue }
    }

    fn args(muted: bool, replace_id: u32) -> Vec<String> {
        let icon = if muted { ICON_MUTED } else { ICON_UNMUTED };
        let mut args = vec![
            format!("--app-name={APP_NAME}"),
            format!("--expire-time={TIMEOUT_MS}"),
            format!("--icon={icon}"),
            "--hint=int:transient:1".to_string(),
            "--print-id".to_string(),
        ];
        if replace_id != 0 {
            args.push(format!("--replace-id={replace_id}"));
        }
        args.push(APP_NAME.to_string());
        args.push(message(muted).to_string());
        args
    }
}

impl Notifier for DesktopNotifier {
    fn mute_changed(&mut self, muted: bool) {
        if self.queue.send(muted).is_err() {
            warn!(muted, "notification task has stopped");
        }
    }
}

/// Show queued notifications in order, each replacing the last one shown
async fn deliver<F, Fut>(mut pending: mpsc::UnboundedReceiver<bool>, mut show: F)
where
    F: FnMut(bool, u32) -> Fut,
    Fut: Future<Output = Option<u32>>,
{
    // 0 until the first notification has been shown
    let mut last_id = 0;
    while let Some(muted) = pending.recv().await {
        if let Some(id) = show(muted, last_id).await {
            last_id = id;
        }
    }
}

/// Run `notify-send`, returning the id of the notification it showed
async fn show(muted: bool, replace_id: u32) -> Option<u32> {
    let output = Command::new(NOTIFY_SEND)
        .args(DesktopNotifier::args(muted, replace_id))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            debug!(muted, "notification shown");
            String::from_utf8_lossy(&output.stdout).trim().parse().ok()
        }
        Ok(output) => {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "notification failed"
            );
            None
        }
        Err(e) => {
            warn!(?e, "failed to run {NOTIFY_SEND}");
            None
        }
    }
}
