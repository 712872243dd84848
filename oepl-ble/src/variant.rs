//! Firmware-family specific exchanges over an open connection

use std::time::Duration;

use oepl_proto::ble::commands;
use oepl_proto::protocol::{self, ConfigAssembler};
use oepl_proto::{DeviceCapabilities, FirmwareVersion, GlobalConfig, Protocol, tlv};

use crate::Error;
use crate::connection::Connection;
use crate::transport::Link;

/// ATC tags ignore commands until this long after `INIT`
pub const ATC_INIT_DELAY: Duration = Duration::from_secs(2);

/// Post-connect setup, run before a connection is handed out
pub async fn initialize_connection<L: Link>(conn: &mut Connection<L>) -> Result<(), Error> {
    match conn.protocol() {
        Protocol::Atc => {
            tracing::debug!(address = conn.address(), delay = ?ATC_INIT_DELAY, "sending ATC init");
            conn.write_command(&commands::INIT).await?;
            tokio::time::sleep(ATC_INIT_DELAY).await;
            Ok(())
        }
        Protocol::Oepl => Ok(()),
    }
}

/// Negotiate width, height, colour scheme and rotation
pub async fn interrogate<L: Link>(conn: &mut Connection<L>) -> Result<DeviceCapabilities, Error> {
    let caps = match conn.protocol() {
        Protocol::Atc => {
            let timeout = conn.config().response_timeout;
            let response = conn
                .write_command_with_response(&commands::GET_DISPLAY_INFO, timeout)
                .await?;
            protocol::parse_atc_display_info(&response).map_err(|source| Error::Protocol {
                address: conn.address().to_string(),
                source,
            })?
        }
        Protocol::Oepl => {
            let config = read_config(conn).await?;
            tlv::extract_display_capabilities(&config).map_err(|source| Error::Config {
                address: conn.address().to_string(),
                source,
            })?
        }
    };
    tracing::info!(
        address = conn.address(),
        width = caps.width,
        height = caps.height,
        color_scheme = caps.color_scheme,
        rotatebuffer = caps.rotatebuffer,
        "interrogated device"
    );
    Ok(caps)
}

fn require_oepl<L: Link>(conn: &Connection<L>, what: &'static str) -> Result<(), Error> {
    match conn.protocol() {
        Protocol::Oepl => Ok(()),
        protocol => Err(Error::NotSupported {
            address: conn.address().to_string(),
            what,
            protocol,
        }),
    }
}

/// Read and parse the full TLV configuration of an OEPL tag
///
/// The tag answers `READ_CONFIG` with chunk 0 and then pushes the remaining
/// chunks on its own.
pub async fn read_config<L: Link>(conn: &mut Connection<L>) -> Result<GlobalConfig, Error> {
    require_oepl(conn, "reading the config")?;
    let address = conn.address().to_string();
    let protocol_error = |source| Error::Protocol {
        address: address.clone(),
        source,
    };

    let timeout = conn.config().response_timeout;
    let chunk_timeout = conn.config().chunk_timeout;
    let first = conn
        .write_command_with_response(&commands::READ_CONFIG, timeout)
        .await?;
    let mut assembler = ConfigAssembler::new(&first).map_err(protocol_error)?;

    while assembler.wants_more() {
        match conn.next_notification(chunk_timeout).await {
            Ok(chunk) => assembler.push(&chunk),
            Err(Error::Timeout { .. }) => {
                tracing::warn!(
                    address = %address,
                    have = assembler.received(),
                    total = assembler.total(),
                    "timed out waiting for config chunk"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    let blob = assembler.finish().map_err(protocol_error)?;
    let config = tlv::parse_device_blob(&blob).map_err(|source| Error::Config {
        address: address.clone(),
        source,
    })?;
    tracing::debug!(
        address = %address,
        displays = config.displays.len(),
        leds = config.leds.len(),
        sensors = config.sensors.len(),
        "device config:\n{config}"
    );
    Ok(config)
}

pub async fn read_firmware_version<L: Link>(
    conn: &mut Connection<L>,
) -> Result<FirmwareVersion, Error> {
    require_oepl(conn, "reading the firmware version")?;
    let timeout = conn.config().response_timeout;
    let response = conn
        .write_command_with_response(&commands::READ_FW_VERSION, timeout)
        .await?;
    let version = FirmwareVersion::parse(&response).map_err(|source| Error::Protocol {
        address: conn.address().to_string(),
        source,
    })?;
    tracing::debug!(address = conn.address(), %version, "firmware version");
    Ok(version)
}
