//! Block transfer: `DATA_INFO`, then 4 KiB blocks on request, part by part

use oepl_proto::frame::{self, BlockResponse, DataInfo, DataType};

use crate::Error;
use crate::connection::Connection;
use crate::transport::Link;

/// How a block transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Complete,
    /// The tag already shows an image with this checksum
    AlreadyDisplayed,
}

enum State {
    AwaitingBlockRequest,
    SendingPackets {
        block_id: u8,
        packets: Vec<Vec<u8>>,
        cursor: usize,
    },
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::AwaitingBlockRequest => "waiting for a block request",
            State::SendingPackets { .. } => "sending block parts",
        }
    }
}

async fn send_current<L: Link>(
    conn: &mut Connection<L>,
    block_id: u8,
    packets: &[Vec<u8>],
    cursor: usize,
) -> Result<(), Error> {
    match packets.get(cursor) {
        Some(packet) => {
            tracing::debug!(
                address = conn.address(),
                block_id,
                part = cursor + 1,
                parts = packets.len(),
                "sending block part"
            );
            conn.write_command(packet).await
        }
        None => {
            tracing::debug!(address = conn.address(), block_id, "no more parts in block");
            Ok(())
        }
    }
}

/// Drive one block transfer of the compressed image `data` to completion
///
/// Every wait uses the connection's response timeout; expiry fails the whole
/// transfer.
pub async fn upload<L: Link>(conn: &mut Connection<L>, data: &[u8]) -> Result<BlockOutcome, Error> {
    let timeout = conn.config().response_timeout;
    let info = DataInfo::for_image(data, DataType::Compressed);
    tracing::info!(
        address = conn.address(),
        size = data.len(),
        crc = %format!("{:#010x}", info.data_ver),
        "starting block upload"
    );

    conn.discard_stale_notifications();
    conn.write_command(&info.to_command()).await?;

    let mut state = State::AwaitingBlockRequest;
    loop {
        let response = conn.next_notification(timeout).await?;
        match BlockResponse::parse(&response) {
            BlockResponse::BlockRequest { block_id, parts } => {
                let packets = frame::block_packets(data, block_id);
                tracing::debug!(
                    address = conn.address(),
                    block_id,
                    parts = ?parts,
                    packets = packets.len(),
                    "block requested"
                );
                send_current(conn, block_id, &packets, 0).await?;
                state = State::SendingPackets {
                    block_id,
                    packets,
                    cursor: 0,
                };
            }
            BlockResponse::PartAck => {
                if let State::SendingPackets {
                    block_id,
                    packets,
                    cursor,
                } = &state
                {
                    send_current(conn, *block_id, packets, *cursor).await?;
                }
            }
            BlockResponse::PartContinue => {
                if let State::SendingPackets {
                    block_id,
                    packets,
                    cursor,
                } = &mut state
                {
                    if *cursor >= packets.len() {
                        tracing::warn!(
                            address = conn.address(),
                            block_id = *block_id,
                            "part cursor out of range"
                        );
                        continue;
                    }
                    *cursor += 1;
                    send_current(conn, *block_id, packets, *cursor).await?;
                }
            }
            BlockResponse::UploadComplete => {
                tracing::info!(address = conn.address(), "block upload complete");
                return Ok(BlockOutcome::Complete);
            }
            BlockResponse::AlreadyDisplayed => {
                tracing::info!(address = conn.address(), "image already displayed");
                return Ok(BlockOutcome::AlreadyDisplayed);
            }
            BlockResponse::Error => {
                return Err(Error::Device {
                    address: conn.address().to_string(),
                    state: state.name(),
                });
            }
            BlockResponse::Other(code) => {
                tracing::debug!(
                    address = conn.address(),
                    code = %format!("{code:04X}"),
                    state = state.name(),
                    "ignoring response"
                );
            }
            BlockResponse::Malformed => {
                tracing::debug!(
                    address = conn.address(),
                    len = response.len(),
                    "ignoring short notification"
                );
            }
        }
    }
}
