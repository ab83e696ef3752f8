//! Chat client front end
//!
//! Sends each line of local input as one frame and prints every frame the
//! server sends. The `/close` sentinel is never printed; it ends the
//! session instead.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{self, FrameReader, FrameWriter};
use crate::config::ClientConfig;
use crate::error::{AppError, ChannelError};
use crate::message::CLOSE_SENTINEL;

/// Shown when the server disconnects us
pub const SERVER_CLOSED_NOTICE: &str = "server closed: press [ENTER] to continue";

const QUIT_COMMAND: &str = "/quit";

/// Connect to the server and chat over stdin/stdout
pub async fn run(config: &ClientConfig) -> Result<(), AppError> {
    let stream = TcpStream::connect(&config.addr).await?;
    info!("Connected to {}", config.addr);

    let (reader, writer) = channel::split(stream);
    let input = BufReader::new(tokio::io::stdin());
    run_session(reader, writer, input, tokio::io::stdout()).await
}

/// Drive one client session over arbitrary streams
pub async fn run_session<R, W, I, O>(
    reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
    input: I,
    output: O,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let closed = CancellationToken::new();
    let receiver = tokio::spawn(receive_loop(reader, output, closed.clone()));

    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Local input closed");
            break;
        };

        if let Err(e) = writer.send(line.as_str()).await {
            error!("Failed to send message to server: {:?}: {}", line, e);
        }
        if line == QUIT_COMMAND {
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!("Failed to close connection: {}", e);
    }
    closed.cancel();
    if let Err(e) = receiver.await {
        warn!("Receive task failed: {}", e);
    }
    Ok(())
}

/// Print incoming frames until the server closes us or we stop
async fn receive_loop<R, O>(mut reader: FrameReader<R>, mut output: O, closed: CancellationToken)
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = reader.receive() => frame,
        };

        let (text, server_closed) = match frame {
            Ok(frame) if frame == CLOSE_SENTINEL => (format!("{SERVER_CLOSED_NOTICE}\n"), true),
            Ok(frame) => (frame, false),
            Err(ChannelError::ConnectionClosed) => {
                debug!("Server closed the connection");
                break;
            }
            Err(e) => {
                error!("Failed to read incoming frames from server: {}", e);
                break;
            }
        };

        let written = async {
            output.write_all(text.as_bytes()).await?;
            output.flush().await
        };
        if let Err(e) = written.await {
            error!("Failed to write to output: {}", e);
            break;
        }
        if server_closed {
            break;
        }
    }

    closed.cancel();
}
