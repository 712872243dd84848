//! Direct write: start frame, pipelined data frames, end frame with refresh

use std::collections::VecDeque;

use oepl_image::DirectWritePayload;
use oepl_proto::frame::{self, DirectWritePlan, DirectWriteResponse, RefreshMode};

use crate::Error;
use crate::connection::Connection;
use crate::transport::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Starting,
    Streaming { in_flight: usize },
    Ending,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Starting => "starting a direct write",
            State::Streaming { .. } => "streaming image data",
            State::Ending => "finishing a direct write",
        }
    }
}

/// Send queued chunks until `depth` are unacknowledged
async fn fill<L: Link>(
    conn: &mut Connection<L>,
    chunks: &mut VecDeque<Vec<u8>>,
    in_flight: &mut usize,
    depth: usize,
) -> Result<(), Error> {
    while *in_flight < depth {
        let Some(chunk) = chunks.pop_front() else {
            break;
        };
        conn.write_command(&frame::direct_write_data(&chunk)).await?;
        *in_flight += 1;
        tracing::trace!(
            address = conn.address(),
            len = chunk.len(),
            in_flight = *in_flight,
            queued = chunks.len(),
            "sent data frame"
        );
    }
    Ok(())
}

/// Stream `payload` and request a `refresh` once the tag has all of it
pub async fn upload<L: Link>(
    conn: &mut Connection<L>,
    payload: &DirectWritePayload,
    refresh: RefreshMode,
) -> Result<(), Error> {
    let timeout = conn.config().response_timeout;
    let depth = conn.config().pipeline_depth.max(1);
    let DirectWritePlan { start, mut chunks } =
        DirectWritePlan::new(&payload.data, payload.uncompressed_size);
    tracing::info!(
        address = conn.address(),
        size = payload.data.len(),
        compressed = payload.uncompressed_size.is_some(),
        frames = chunks.len(),
        %refresh,
        "starting direct write"
    );

    conn.discard_stale_notifications();
    conn.write_command(&start).await?;

    let mut state = State::Starting;
    loop {
        let response = conn.next_notification(timeout).await?;
        let parsed = DirectWriteResponse::parse(&response);
        state = match (state, parsed) {
            (_, DirectWriteResponse::Error) => {
                return Err(Error::Device {
                    address: conn.address().to_string(),
                    state: state.name(),
                });
            }
            (State::Starting, DirectWriteResponse::StartAck) => {
                let mut in_flight = 0;
                fill(conn, &mut chunks, &mut in_flight, depth).await?;
                State::Streaming { in_flight }
            }
            (State::Streaming { mut in_flight }, DirectWriteResponse::DataAck) => {
                in_flight = in_flight.saturating_sub(1);
                fill(conn, &mut chunks, &mut in_flight, depth).await?;
                State::Streaming { in_flight }
            }
            (State::Ending, DirectWriteResponse::EndAck) => {
                tracing::info!(address = conn.address(), "direct write complete");
                return Ok(());
            }
            (state, other) => {
                tracing::debug!(
                    address = conn.address(),
                    response = ?other,
                    state = state.name(),
                    "ignoring response"
                );
                state
            }
        };

        if state == (State::Streaming { in_flight: 0 }) && chunks.is_empty() {
            conn.write_command(&frame::direct_write_end(refresh)).await?;
            state = State::Ending;
        }
    }
}
