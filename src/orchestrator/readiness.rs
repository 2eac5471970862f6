use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::setup::READY_MARKER;
use crate::engine::EngineError;
use crate::error::{CanonError, Result};

/// Read container output line by line until the ready marker shows up
///
/// Every complete line is handed to `echo`. Reading stops right after the
/// marker line, so anything the container prints later stays in the stream.
/// A stream that ends without the marker is an error.
pub async fn wait_for_ready<S, F>(output: &mut S, mut echo: F) -> Result<()>
where
    S: Stream<Item = std::result::Result<Bytes, EngineError>> + Unpin,
    F: FnMut(&str),
{
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = output.next().await {
        pending.extend_from_slice(&chunk?);

        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            echo(line);
            if line.contains(READY_MARKER) {
                return Ok(());
            }
        }
    }

    // trailing text without a newline
    if !pending.is_empty() {
        let line = String::from_utf8_lossy(&pending);
        echo(&line);
        if line.contains(READY_MARKER) {
            return Ok(());
        }
    }

    Err(CanonError::NotReady)
}
