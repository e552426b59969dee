//! User notification of confirmed mute changes

mod desktop;

pub use desktop::DesktopNotifier;

/// Receives the mute state once the server has confirmed it
pub trait Notifier: Send {
    fn mute_changed(&mut self, muted: bool);
}

/// Notifier that does nothing, for `--no-notify`
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Notifier for Silent {
    fn mute_changed(&mut self, _muted: bool) {}
}

/// Summary and body text for a mute state
pub fn message(muted: bool) -> &'static str {
    if muted {
        "Microphone muted"
    } else {
        "Microphone unmuted"
    }
}
