use crate::config::IngestConfig;
use crate::db::models::camera_models::Camera;
use crate::db::repositories::cameras::CameraDirectory;
use crate::error::Error;
use crate::ingest::IngestPipeline;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Restricted mail-submission listener for camera alarm traffic.
///
/// Speaks just enough SMTP for cameras: HELO/EHLO, MAIL FROM, RCPT TO, DATA,
/// RSET, NOOP, QUIT. Recipients must resolve to a registered camera alias;
/// anything else is refused with a permanent failure so a misconfigured
/// camera fails loudly at its own log instead of being silently dropped.
pub struct SmtpServer {
    config: IngestConfig,
    directory: Arc<dyn CameraDirectory>,
    pipeline: Arc<IngestPipeline>,
}

struct Session {
    from: Option<String>,
    camera: Option<Camera>,
}

impl Session {
    fn reset(&mut self) {
        self.from = None;
        self.camera = None;
    }
}

impl SmtpServer {
    pub fn new(
        config: IngestConfig,
        directory: Arc<dyn CameraDirectory>,
        pipeline: Arc<IngestPipeline>,
    ) -> Self {
        Self {
            config,
            directory,
            pipeline,
        }
    }

    /// Accept loop; one task per camera connection
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.config.address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Ingestion(format!("failed to bind {}: {}", addr, e)))?;

        info!("Mail ingestion listening on {}", addr);

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| Error::Ingestion(format!("accept failed: {}", e)))?;

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!("Mail session from {} ended with error: {}", peer, e);
                }
            });
        }
    }

    /// Drive one mail session over any byte stream
    pub async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_line(
            &mut write_half,
            &format!("220 {} ESMTP central-station ready", self.config.hostname),
        )
        .await?;

        let mut session = Session {
            from: None,
            camera: None,
        };

        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).await?;
            if n == 0 {
                return Ok(());
            }

            let command = String::from_utf8_lossy(&line).trim_end().to_string();
            let upper = command.to_ascii_uppercase();

            if upper.starts_with("HELO") {
                write_line(&mut write_half, &format!("250 {}", self.config.hostname)).await?;
            } else if upper.starts_with("EHLO") {
                write_line(&mut write_half, &format!("250-{}", self.config.hostname)).await?;
                write_line(&mut write_half, "250 8BITMIME").await?;
            } else if upper.starts_with("MAIL FROM:") {
                session.reset();
                session.from = Some(address_of(&command["MAIL FROM:".len()..]));
                write_line(&mut write_half, "250 OK").await?;
            } else if upper.starts_with("RCPT TO:") {
                if session.from.is_none() {
                    write_line(&mut write_half, "503 5.5.1 MAIL first").await?;
                    continue;
                }

                let recipient = address_of(&command["RCPT TO:".len()..]);
                let alias = recipient.split('@').next().unwrap_or("").to_string();

                match self.directory.camera_by_alias(&alias).await? {
                    Some(camera) => {
                        // First resolved recipient wins; cameras send to one
                        // address.
                        if session.camera.is_none() {
                            session.camera = Some(camera);
                        }
                        write_line(&mut write_half, "250 OK").await?;
                    }
                    None => {
                        warn!("Rejected mail for unknown recipient {}", recipient);
                        write_line(
                            &mut write_half,
                            &format!("550 5.1.1 unknown recipient {}", recipient),
                        )
                        .await?;
                    }
                }
            } else if upper == "DATA" {
                let Some(camera) = session.camera.clone() else {
                    write_line(&mut write_half, "554 5.5.1 no valid recipients").await?;
                    continue;
                };

                write_line(&mut write_half, "354 End data with <CR><LF>.<CR><LF>").await?;

                match read_data(&mut reader, self.config.max_message_bytes).await? {
                    Some(raw) => match self.pipeline.ingest(&camera, &raw).await {
                        Ok(event) => {
                            write_line(&mut write_half, &format!("250 OK queued as {}", event.id))
                                .await?;
                        }
                        Err(e) => {
                            warn!("Ingestion failed for camera {}: {}", camera.id, e);
                            write_line(&mut write_half, "451 4.3.0 processing failed").await?;
                        }
                    },
                    None => {
                        write_line(&mut write_half, "552 5.3.4 message too large").await?;
                    }
                }

                session.reset();
            } else if upper == "RSET" {
                session.reset();
                write_line(&mut write_half, "250 OK").await?;
            } else if upper == "NOOP" {
                write_line(&mut write_half, "250 OK").await?;
            } else if upper == "QUIT" {
                write_line(&mut write_half, "221 Bye").await?;
                return Ok(());
            } else {
                write_line(&mut write_half, "500 5.5.2 unrecognized command").await?;
            }
        }
    }
}

/// Extract the bare address from `<addr>` (with optional parameters after it)
fn address_of(input: &str) -> String {
    let input = input.trim();
    if let Some(start) = input.find('<') {
        if let Some(end) = input[start..].find('>') {
            return input[start + 1..start + end].trim().to_string();
        }
    }
    input
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Read a DATA body up to the lone-dot terminator, undoing dot-stuffing.
/// Returns None when the message exceeds the size ceiling (the rest is
/// consumed so the session stays usable).
async fn read_data<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut raw: Vec<u8> = Vec::new();
    let mut overflow = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(Error::Ingestion("connection closed inside DATA".to_string()).into());
        }

        let trimmed: &[u8] = if line.ends_with(b"\r\n") {
            &line[..line.len() - 2]
        } else if line.ends_with(b"\n") {
            &line[..line.len() - 1]
        } else {
            &line
        };

        if trimmed == b"." {
            break;
        }

        if overflow {
            continue;
        }

        // Dot-stuffed lines lose their leading dot
        let payload: &[u8] = if line.starts_with(b"..") {
            &line[1..]
        } else {
            &line
        };

        if raw.len() + payload.len() > max_bytes {
            overflow = true;
            raw.clear();
            continue;
        }
        raw.extend_from_slice(payload);
    }

    if overflow {
        Ok(None)
    } else {
        Ok(Some(raw))
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}
