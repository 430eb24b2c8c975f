//! Drops client text frames that are not valid UTF-8.
//!
//! The protocol layer ends the whole connection on such a frame. Clients of
//! this server only send JSON text, so an undecodable text frame is treated
//! like any other malformed message: logged and skipped. Frame boundaries
//! are found with tungstenite's own header parser; everything else passes
//! through untouched.

use std::io::{self, Cursor, IoSlice};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::FrameHeader;
use tracing::warn;

const READ_CHUNK: usize = 8 * 1024;

/// Socket wrapper placed between the TCP stream and the WebSocket protocol
/// layer.
#[derive(Debug)]
pub struct TextFrameFilter<S> {
    inner: S,
    /// Bytes read from `inner` and not handed on yet
    pending: Vec<u8>,
    /// Bytes of already inspected frames still to be handed on
    passthrough: u64,
    /// Text frames longer than this are left for the protocol layer to reject
    max_checked: u64,
    /// Set once the stream can no longer be followed frame by frame
    transparent: bool,
}

impl<S> TextFrameFilter<S> {
    /// Wraps `inner`. `buffered` holds bytes the client sent right after the
    /// upgrade request, which were already read off the socket.
    pub fn new(inner: S, buffered: Vec<u8>, max_checked: usize) -> Self {
        Self {
            inner,
            pending: buffered,
            passthrough: 0,
            max_checked: max_checked as u64,
            transparent: false,
        }
    }

    fn releasable(&self) -> usize {
        if self.transparent {
            self.pending.len()
        } else {
            self.pending.len().min(self.passthrough as usize)
        }
    }
}

impl<S: AsyncRead + Unpin> TextFrameFilter<S> {
    /// Reads one chunk from the socket into `pending`. `Ok(0)` is EOF.
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut read_buf = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf))?;
        let filled = read_buf.filled();
        self.pending.extend_from_slice(filled);
        Poll::Ready(Ok(filled.len()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TextFrameFilter<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let ready = this.releasable();
            if ready > 0 {
                let n = ready.min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.drain(..n);
                if !this.transparent {
                    this.passthrough -= n as u64;
                }
                return Poll::Ready(Ok(()));
            }

            if this.transparent || this.passthrough > 0 {
                if ready!(this.poll_fill(cx))? == 0 {
                    return Poll::Ready(Ok(()));
                }
                continue;
            }

            // At a frame boundary: look at the next header.
            let parsed = {
                let mut cursor = Cursor::new(&this.pending[..]);
                FrameHeader::parse(&mut cursor)
                    .map(|header| header.map(|(header, length)| (header, cursor.position(), length)))
            };

            match parsed {
                Ok(Some((header, header_len, length))) => {
                    let frame_len = header_len + length;
                    let checked = header.is_final
                        && matches!(header.opcode, OpCode::Data(Data::Text))
                        && length <= this.max_checked;
                    if !checked {
                        this.passthrough = frame_len;
                        continue;
                    }

                    if (this.pending.len() as u64) < frame_len {
                        if ready!(this.poll_fill(cx))? == 0 {
                            this.transparent = true;
                        }
                        continue;
                    }

                    let (start, end) = (header_len as usize, frame_len as usize);
                    if is_utf8(&this.pending[start..end], header.mask) {
                        this.passthrough = frame_len;
                    } else {
                        warn!("Ignoring {} byte text frame that is not valid UTF-8", length);
                        this.pending.drain(..end);
                    }
                }
                Ok(None) => {
                    if ready!(this.poll_fill(cx))? == 0 {
                        this.transparent = true;
                    }
                }
                Err(_) => this.transparent = true,
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TextFrameFilter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

fn is_utf8(payload: &[u8], mask: Option<[u8; 4]>) -> bool {
    match mask {
        Some(mask) => {
            let unmasked: Vec<u8> = payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % 4])
                .collect();
            std::str::from_utf8(&unmasked).is_ok()
        }
        None => std::str::from_utf8(payload).is_ok(),
    }
}
