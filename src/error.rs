use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("GPIO {pin} for {name} is out of range, ESP32-S3 pins are 0..=48")]
    InvalidPin { name: &'static str, pin: u8 },

    #[error("{a} and {b} are both wired to GPIO {pin}")]
    PinConflict {
        a: &'static str,
        b: &'static str,
        pin: u8,
    },

    #[error("Baud rate {0} is not supported by the GM812")]
    UnsupportedBaud(u32),

    #[error("Broadcast port must be nonzero")]
    ZeroPort,

    #[error("Subnet mask {0} is not a contiguous prefix")]
    BadSubnetMask(Ipv4Addr),

    #[error("Scanner did not answer the startup probe")]
    ScannerProbe,

    #[error("No usable network after waiting {0:?}")]
    LinkTimeout(Duration),

    #[error("No scan events found in log")]
    EmptyLog,
}
