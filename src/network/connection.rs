use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info};

use crate::pipeline::{ConnectionContext, IdleEvent, LiveChain};
use crate::service::{AppResult, ServerError, ShutdownSignal};

use super::idle::{IdlePolicy, IdleTimers};

/// One accepted connection: the socket, its read buffer, the live handler
/// chain and the idle timers. Events are dispatched to the chain in strict
/// arrival order; the close event is always delivered after all prior reads.
pub(crate) struct Connection {
    ctx: ConnectionContext,
    chain: LiveChain,
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    buffer: BytesMut,
    encode_buf: BytesMut,
    timers: IdleTimers,
    shutdown: ShutdownSignal,
}

impl Connection {
    pub(crate) fn new(
        socket: TcpStream,
        connection_id: u64,
        peer_addr: SocketAddr,
        server_name: String,
        chain: LiveChain,
        idle: IdlePolicy,
        shutdown: ShutdownSignal,
        read_buffer_size: usize,
    ) -> Connection {
        let (reader, writer) = socket.into_split();
        Connection {
            ctx: ConnectionContext::new(connection_id, peer_addr, server_name),
            chain,
            reader,
            writer: BufWriter::new(writer),
            buffer: BytesMut::with_capacity(read_buffer_size),
            encode_buf: BytesMut::new(),
            timers: IdleTimers::new(idle, Instant::now()),
            shutdown,
        }
    }

    /// Drives the connection until the peer closes, an idle reclamation or
    /// shutdown fires, or an I/O fault occurs. Faults are isolated to this
    /// connection; the server keeps running.
    pub(crate) async fn run(mut self) -> AppResult<()> {
        self.chain.on_active(&mut self.ctx);
        self.flush_outbound().await?;

        let result = self.read_loop().await;

        self.chain.on_inactive(&mut self.ctx);
        // best effort: the peer may already be gone
        let _ = self.flush_outbound().await;
        result
    }

    async fn read_loop(&mut self) -> AppResult<()> {
        loop {
            if self.ctx.close_requested() {
                break;
            }
            let deadline = self.timers.next_deadline();
            tokio::select! {
                res = self.reader.read_buf(&mut self.buffer) => {
                    let n = res
                        .map_err(|e| ServerError::RuntimeIo(format!("read error: {}", e)))?;
                    if n == 0 {
                        self.dispatch_eof()?;
                        let _ = self.flush_outbound().await;
                        break;
                    }
                    self.timers.on_read(Instant::now());
                    self.dispatch_reads()?;
                    self.flush_outbound().await?;
                }
                event = idle_wait(deadline) => {
                    self.timers.fired(event, Instant::now());
                    self.chain.on_idle(&mut self.ctx, event);
                    self.flush_outbound().await?;
                    if event == IdleEvent::ReaderIdle {
                        info!(
                            server = %self.ctx.server_name(),
                            connection_id = self.ctx.connection_id(),
                            peer = %self.ctx.peer_addr(),
                            "reclaiming reader-idle connection"
                        );
                        break;
                    }
                }
                _ = self.shutdown.recv() => {
                    debug!(
                        connection_id = self.ctx.connection_id(),
                        "connection exits read loop on shutdown signal"
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    fn dispatch_reads(&mut self) -> AppResult<()> {
        let mut frames = Vec::new();
        if let Some(decoder) = self.chain.decoder_mut() {
            while let Some(frame) = decoder
                .decode(&mut self.buffer)
                .map_err(|e| ServerError::RuntimeIo(format!("decode error: {}", e)))?
            {
                frames.push(frame);
            }
        } else if let Some(msg) = take_trimmed_text(&mut self.buffer) {
            frames.push(msg);
        }
        for frame in frames {
            self.deliver(frame)?;
        }
        Ok(())
    }

    fn dispatch_eof(&mut self) -> AppResult<()> {
        let mut frames = Vec::new();
        if let Some(decoder) = self.chain.decoder_mut() {
            while let Some(frame) = decoder
                .decode_eof(&mut self.buffer)
                .map_err(|e| ServerError::RuntimeIo(format!("decode error: {}", e)))?
            {
                frames.push(frame);
            }
        } else if let Some(msg) = take_trimmed_text(&mut self.buffer) {
            frames.push(msg);
        }
        for frame in frames {
            self.deliver(frame)?;
        }
        Ok(())
    }

    fn deliver(&mut self, msg: Bytes) -> AppResult<()> {
        if let Err(err) = self.chain.on_read(&mut self.ctx, msg) {
            self.chain.on_error(&mut self.ctx, &err);
            return Err(err);
        }
        Ok(())
    }

    async fn flush_outbound(&mut self) -> AppResult<()> {
        let queued = self.ctx.take_outbound();
        if queued.is_empty() {
            return Ok(());
        }
        for msg in queued {
            if let Some(encoder) = self.chain.encoder_mut() {
                encoder
                    .encode(msg, &mut self.encode_buf)
                    .map_err(|e| ServerError::RuntimeIo(format!("encode error: {}", e)))?;
            } else {
                self.encode_buf.extend_from_slice(&msg);
            }
        }
        self.writer
            .write_all(&self.encode_buf)
            .await
            .map_err(|e| ServerError::RuntimeIo(format!("write error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ServerError::RuntimeIo(format!("flush error: {}", e)))?;
        self.encode_buf.clear();
        self.timers.on_write(Instant::now());
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(
            connection_id = self.ctx.connection_id(),
            "connection dropped"
        );
    }
}

/// Default framing when no decoder is configured: the read bytes are
/// decoded as text and trimmed of surrounding whitespace before dispatch.
fn take_trimmed_text(buffer: &mut BytesMut) -> Option<Bytes> {
    if buffer.is_empty() {
        return None;
    }
    let raw = buffer.split().freeze();
    let text = String::from_utf8_lossy(&raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Bytes::copy_from_slice(trimmed.as_bytes()))
    }
}

async fn idle_wait(deadline: Option<(Instant, IdleEvent)>) -> IdleEvent {
    match deadline {
        Some((at, event)) => {
            time::sleep_until(at).await;
            event
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let mut buf = BytesMut::from(&b"  ping\r\n"[..]);
        assert_eq!(
            take_trimmed_text(&mut buf),
            Some(Bytes::from_static(b"ping"))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn whitespace_only_read_dispatches_nothing() {
        let mut buf = BytesMut::from(&b" \r\n"[..]);
        assert_eq!(take_trimmed_text(&mut buf), None);
        assert!(take_trimmed_text(&mut BytesMut::new()).is_none());
    }
}
