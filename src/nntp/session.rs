//! Per-connection session
//!
//! Each connection runs two workers joined to a forwarding main loop:
//!
//! - the **reader** blocks on line input and forwards non-empty lines,
//! - the **processor** parses and dispatches each line and writes replies.
//!
//! The channels between them are bounded to one line so commands are
//! processed strictly in receipt order with back-pressure on the reader. The
//! main loop multiplexes line arrival, shutdown, reader exit, and processor
//! exit, and collapses all of them into a single cleanup path: channel
//! closure is the termination signal, and dropping the stream halves closes
//! the transport.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::spool::Spool;

use super::commands::{self, Flow, SessionState};
use super::{responses, wire};

/// Drive one client connection to completion
///
/// Generic over the stream so tests can drive a session over an in-memory
/// duplex pipe.
pub async fn run<S>(stream: S, spool: Arc<Spool>, mut shutdown: broadcast::Receiver<()>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);

    if let Err(e) = wire::write_line(&mut write_half, responses::GREETING).await {
        warn!("error writing greeting to connection: {e}");
        return;
    }

    let (line_tx, mut line_rx) = mpsc::channel::<String>(1);
    let (request_tx, request_rx) = mpsc::channel::<String>(1);

    let reader = tokio::spawn(reader_loop(read_half, line_tx));
    let mut processor = tokio::spawn(process_loop(write_half, spool, request_rx));
    let mut processor_done = false;
    let mut shutdown_closed = false;

    loop {
        tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => {
                    // The processor consumes one line at a time; a closed
                    // request channel means it already exited.
                    if request_tx.send(line).await.is_err() {
                        break;
                    }
                }
                // Reader exited on EOF or a read error.
                None => break,
            },
            _ = &mut processor, if !processor_done => {
                processor_done = true;
                break;
            }
            result = shutdown.recv(), if !shutdown_closed => match result {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    debug!("session cancelled by shutdown");
                    break;
                }
                // Sender gone without a signal: no shutdown will ever come.
                Err(broadcast::error::RecvError::Closed) => shutdown_closed = true,
            },
        }
    }

    // Closing the request channel tells the processor to finish; the reader
    // may be parked on a socket read and is aborted instead.
    drop(request_tx);
    reader.abort();
    if !processor_done {
        let _ = processor.await;
    }
    debug!("closing connection");
}

/// Forward non-empty lines from the socket until EOF or error
async fn reader_loop<S>(read_half: ReadHalf<S>, line_tx: mpsc::Sender<String>)
where
    S: AsyncRead,
{
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                if line_tx.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("error reading line from connection: {e}");
                return;
            }
        }
    }
}

/// Parse and dispatch requests until the channel closes or QUIT
async fn process_loop<S>(
    mut write_half: WriteHalf<S>,
    spool: Arc<Spool>,
    mut request_rx: mpsc::Receiver<String>,
) where
    S: AsyncWrite,
{
    let mut state = SessionState::new();
    while let Some(line) = request_rx.recv().await {
        if line.is_empty() {
            return;
        }
        let cmd = commands::parse_line(&line);
        match commands::dispatch(&mut write_half, &spool, &mut state, &cmd).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return,
            Err(e) => {
                // A write failure is fatal to the session.
                warn!("error writing to connection: {e}");
                return;
            }
        }
    }
}
