//! Live console streaming
//!
//! Unlike every other operation, monitoring has no deadline: it forwards each
//! line until the shutdown future resolves (typically Ctrl-C).

use std::future::Future;
use std::time::Duration;

use sen_protocol::{classify, decode_line, ClassifiedLine};
use tracing::info;

use crate::error::LinkError;
use crate::transport::Transport;

/// Stream classified lines into `sink` until `shutdown` completes
///
/// Returns the number of lines forwarded.
pub async fn monitor<F, S>(
    transport: &mut dyn Transport,
    poll_interval: Duration,
    shutdown: F,
    mut sink: S,
) -> Result<usize, LinkError>
where
    F: Future<Output = ()> + Send,
    S: FnMut(&ClassifiedLine) + Send,
{
    info!("Monitoring {}", transport.name());
    tokio::pin!(shutdown);
    let mut forwarded = 0usize;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Monitor stopped after {} lines", forwarded);
                break;
            }

            result = transport.read_line(poll_interval) => {
                if let Some(text) = result?.as_deref().and_then(decode_line) {
                    sink(&classify(&text));
                    forwarded += 1;
                }
            }
        }
    }

    Ok(forwarded)
}
