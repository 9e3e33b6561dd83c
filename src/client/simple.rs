//! Unary exec path.

use tracing::debug;

use crate::client::CliClient;
use crate::protocol::wire::{
    next_frame, send_frame, CallHeader, Method, SimpleExecRequest, SimpleExecResponse,
};
use crate::{AppError, Result};

impl CliClient {
    /// Run `command` in the plugin and return its output verbatim.
    ///
    /// Each call opens its own stream, so repeated calls share no state.
    ///
    /// # Errors
    ///
    /// - [`AppError::Stream`]: the stream could not be opened, closed
    ///   before a response, or exceeded the configured call deadline.
    /// - [`AppError::Remote`]: the plugin answered with an error.
    pub async fn exec_simple(&self, command: &str, args: &[String]) -> Result<String> {
        let call = self.round_trip(SimpleExecRequest {
            command: command.to_owned(),
            args: args.to_vec(),
        });

        let response = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                AppError::Stream(format!("deadline exceeded after {limit:?} for '{command}'"))
            })??,
            None => call.await?,
        };

        if let Some(message) = response.error {
            return Err(AppError::Remote(message));
        }

        debug!(command, bytes = response.output.len(), "exec_simple: response received");
        Ok(response.output)
    }

    async fn round_trip(&self, request: SimpleExecRequest) -> Result<SimpleExecResponse> {
        let (mut reader, mut writer) = self.connection.open_stream().await?;

        send_frame(
            &mut writer,
            &CallHeader {
                method: Method::ExecSimple,
            },
        )
        .await?;
        send_frame(&mut writer, &request).await?;

        let closed = self.connection.closed_token();
        tokio::select! {
            biased;
            () = closed.cancelled() => Err(AppError::Stream("connection closed".into())),
            frame = next_frame::<_, SimpleExecResponse>(&mut reader) => {
                frame?.ok_or_else(|| {
                    AppError::Stream("stream closed before a response was received".into())
                })
            }
        }
    }
}
