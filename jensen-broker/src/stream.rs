//! Processing a request read from a stream, writing the response to another.
//!
//! Each call handles exactly one request: the reader is read to its end, and whatever was read is
//! the request.  Framing several requests on one connection is the transport's business.
use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::broker::Broker;
use crate::error::BrokerError;

impl Broker {
    /// Read one request from `reader` and write its response to `writer`.
    ///
    /// Nothing is written for notifications.  Failing to read the request is answered with an
    /// internal error; failing to write the response is returned to the caller, as there is
    /// nobody else left to tell.
    pub fn process_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> std::io::Result<()> {
        let mut bytes = Vec::new();
        let output = match reader.read_to_end(&mut bytes) {
            Ok(_) => self.process_bytes(&bytes),
            Err(source) => {
                tracing::warn!(error = %source, "Failed to read request");
                self.respond_to_failure(BrokerError::Read { source })
            }
        };

        if let Some(text) = output {
            writer.write_all(text.as_bytes())?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Async variant of [`Broker::process_stream`].
    ///
    /// The request is processed on tokio's blocking thread pool, since members are ordinary
    /// blocking functions.
    pub async fn process_async_stream<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut bytes = Vec::new();
        let output = match reader.read_to_end(&mut bytes).await {
            Ok(_) => {
                let broker = self.clone();
                match tokio::task::spawn_blocking(move || broker.process_bytes(&bytes)).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::error!(error = %e, "Request processing task failed");
                        self.respond_to_failure(BrokerError::Worker { message: e.to_string() })
                    }
                }
            }
            Err(source) => {
                tracing::warn!(error = %source, "Failed to read request");
                self.respond_to_failure(BrokerError::Read { source })
            }
        };

        if let Some(text) = output {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await?;
        }

        Ok(())
    }
}
