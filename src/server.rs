//! Server side of a session: one task draining requests from its virtual
//! stream, dispatching into the registry and writing responses back.

use crate::codec;
use crate::error::Error;
use crate::registry::Registry;
use crate::stream::{StreamReader, StreamWriter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs until the stream reports closure, so closing the session tears
/// this loop down without extra signalling. Handler failures go back to
/// the caller as error responses; only transport failures end the loop.
pub(crate) async fn serve_requests(
    mut reader: StreamReader,
    mut writer: StreamWriter,
    registry: Arc<Registry>,
) {
    loop {
        let (request, body) = match codec::read_request(&mut reader).await {
            Ok(next) => next,
            Err(Error::Closed) => break,
            Err(e) => {
                warn!(error = %e, "server codec failed");
                break;
            }
        };

        let reply = registry.dispatch(&request.method, &body);
        let written = match reply {
            Ok(result) => {
                codec::write_response(&mut writer, request.seq, Ok(result.as_ref())).await
            }
            Err(e) => {
                let text = e.to_string();
                debug!(method = %request.method, error = %text, "handler error");
                codec::write_response(&mut writer, request.seq, Err(text.as_str())).await
            }
        };
        if let Err(e) = written {
            if !matches!(e, Error::Closed) {
                warn!(error = %e, "response write failed");
            }
            break;
        }
    }
    debug!("server codec loop exited");
}
