//! Multiplexed container log stream.
//!
//! The engine frames combined stdout/stderr as an 8-byte header (stream
//! type, three zero bytes, payload length as big-endian u32) followed by
//! the payload. [`LogStream`] decodes frames as body bytes arrive and
//! yields the raw payloads; consumers concatenate them into text.
//!
//! Dropping the stream aborts the connection task, which closes the
//! socket — follow-mode streams are never left dangling on the engine.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use hyper::body::{Body, Incoming};
use tokio::task::JoinHandle;

use crate::engine::{EngineError, Result};

const FRAME_HEADER_LEN: usize = 8;

/// Decoded log payload chunks from one `GET /containers/{id}/logs` call.
pub struct LogStream {
    body: Incoming,
    connection: JoinHandle<()>,
    buffer: BytesMut,
}

impl LogStream {
    pub(crate) fn new(body: Incoming, connection: JoinHandle<()>) -> Self {
        Self {
            body,
            connection,
            buffer: BytesMut::new(),
        }
    }
}

impl Stream for LogStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match split_frame(&mut this.buffer) {
                Ok(Some(payload)) => return Poll::Ready(Some(Ok(payload))),
                Ok(None) => {}
                Err(err) => return Poll::Ready(Some(Err(err))),
            }

            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        this.buffer.extend_from_slice(&data);
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err.into()))),
                Poll::Ready(None) => {
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    // Truncated trailing frame; the engine closed mid-write.
                    this.buffer.clear();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

/// Split one complete frame off the front of `buffer`, if present.
fn split_frame(buffer: &mut BytesMut) -> Result<Option<Bytes>> {
    if buffer.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let stream_type = buffer[0];
    if stream_type > 2 || buffer[1] != 0 || buffer[2] != 0 || buffer[3] != 0 {
        return Err(EngineError::Protocol(format!(
            "invalid log frame header: {:02x?}",
            &buffer[..FRAME_HEADER_LEN]
        )));
    }

    let payload_len = u32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]) as usize;
    if buffer.len() < FRAME_HEADER_LEN + payload_len {
        return Ok(None);
    }

    buffer.advance(FRAME_HEADER_LEN);
    Ok(Some(buffer.split_to(payload_len).freeze()))
}
