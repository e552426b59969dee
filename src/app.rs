//! The cooperative event loop tying server events, capture data and
//! termination signals together

use std::future::Future;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::detect::Detector;
use crate::lifecycle::Termination;
use crate::server::{DeviceServer, ServerEvent};
use crate::session::{DeviceSession, SessionError};

/// Run a session until a termination signal or a failure
///
/// Server events, capture data and the termination signal are handled one
/// at a time on the calling task. On exit the session is torn down and the
/// released server is handed back with the outcome.
pub async fn run<S, F>(
    mut session: DeviceSession<S>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut detector: Detector,
    shutdown: F,
) -> (S, Result<Termination, SessionError>)
where
    S: DeviceServer,
    F: Future<Output = Termination>,
{
    tokio::pin!(shutdown);
    session.start();

    let outcome = loop {
        tokio::select! {
            biased;

            termination = &mut shutdown => {
                info!(signal = %termination, "got exit signal");
                break Ok(termination);
            }

            event = events.recv() => {
                let Some(event) = event else {
                    break Err(SessionError::Disconnected);
                };
                if let Err(e) = session.handle_event(event) {
                    break Err(e);
                }
            }

            readable = session.readable() => {
                if let Err(e) = readable {
                    break Err(e);
                }
                process_available(&mut session, &mut detector);
            }
        }
    };

    info!("cleaning up");
    let server = session.close();
    (server, outcome)
}

/// Classify everything buffered on the stream, acknowledge it, then act on edges
fn process_available<S: DeviceServer>(session: &mut DeviceSession<S>, detector: &mut Detector) {
    let data = session.peek();
    let len = data.len();
    if len == 0 {
        return;
    }

    let edges = detector.push_bytes(data);
    session.drop_fragment(len);

    for edge in edges {
        debug!(%edge, "edge detected");
        session.handle_edge(edge);
    }
}
