//! Async stream line readers (non-UTF8-safe).
//!
//! Trainers are Python programs wrapping native code and can emit invalid
//! UTF-8. `BufReader::lines()` would end the reader on the first bad byte, so
//! lines are split on raw bytes and decoded lossily.
//!
//! Both `\n` and `\r` end a line: progress bars redraw themselves with bare
//! carriage returns and every redraw should be seen as it happens. Empty
//! lines are dropped.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Forward every line of `stream` into `lines` until EOF, a read error, or
/// the receiver going away.
pub fn spawn_line_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    stream_type: &'static str,
    lines: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            let (used, line_done) = match reader.fill_buf().await {
                Ok([]) => break, // EOF
                Ok(chunk) => match chunk.iter().position(|b| matches!(b, b'\n' | b'\r')) {
                    Some(pos) => {
                        buf.extend_from_slice(&chunk[..pos]);
                        (pos + 1, true)
                    }
                    None => {
                        buf.extend_from_slice(chunk);
                        (chunk.len(), false)
                    }
                },
                Err(e) => {
                    debug!(target: "tagtrack.process", %stream_type, error = %e, "Stream reader exiting due to read error");
                    break;
                }
            };
            reader.consume(used);

            if line_done && !flush(&mut buf, stream_type, &lines) {
                return;
            }
        }

        flush(&mut buf, stream_type, &lines);
        trace!(target: "tagtrack.process", %stream_type, "Stream reader task exiting");
    })
}

/// Send the buffered line, if any. Returns `false` once nobody listens.
fn flush(buf: &mut Vec<u8>, stream_type: &str, lines: &mpsc::UnboundedSender<String>) -> bool {
    if buf.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    trace!(target: "tagtrack.process", %stream_type, "{line}");
    lines.send(line).is_ok()
}
