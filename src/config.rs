use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

use crate::error::Error;

// Serial port configuration
pub const SERIAL_TIMEOUT_MS: u64 = 100;

/// Baud rates the GM812 can be programmed to use.
pub const GM812_BAUD_RATES: [u32; 8] = [1200, 4800, 9600, 14400, 19200, 38400, 57600, 115_200];

/// Highest GPIO index on the ESP32-S3.
pub const MAX_GPIO: u8 = 48;

/// SPI wiring of the W5500 Ethernet transceiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthWiring {
    pub miso: u8,
    pub mosi: u8,
    pub sclk: u8,
    pub cs: u8,
    pub int: u8,
    pub rst: u8,
}

impl Default for EthWiring {
    fn default() -> Self {
        // Waveshare ESP32-S3-ETH routing
        Self {
            miso: 12,
            mosi: 11,
            sclk: 13,
            cs: 14,
            int: 10,
            rst: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Static addressing when true, otherwise whatever DHCP handed the host.
    pub use_static_ip: bool,
    pub static_ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns1: Ipv4Addr,
    pub dns2: Ipv4Addr,
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            use_static_ip: true,
            static_ip: Ipv4Addr::new(192, 168, 0, 123),
            gateway: Ipv4Addr::new(192, 168, 0, 1),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            dns1: Ipv4Addr::new(8, 8, 8, 8),
            dns2: Ipv4Addr::new(8, 8, 4, 4),
            connect_timeout_ms: 30_000,
        }
    }
}

impl NetworkConfig {
    /// Address datagrams leave from: the static IP when configured, any
    /// local address otherwise.
    pub fn source_addr(&self) -> Ipv4Addr {
        if self.use_static_ip {
            self.static_ip
        } else {
            Ipv4Addr::UNSPECIFIED
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub device: String,
    pub rx_pin: u8,
    pub tx_pin: u8,
    pub baud: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyAMA2".to_string(),
            rx_pin: 21,
            tx_pin: 17,
            baud: 9600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub addr: Ipv4Addr,
    pub port: u16,
    /// Identifies this node in emitted events. Defaults to the hostname.
    pub node_id: Option<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::BROADCAST,
            port: 4210,
            node_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Quiet time after the last scanner byte that closes a frame.
    pub barcode_quiet_ms: u64,
    pub main_loop_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            barcode_quiet_ms: 100,
            main_loop_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wiring: EthWiring,
    pub network: NetworkConfig,
    pub scanner: ScannerConfig,
    pub broadcast: BroadcastConfig,
    pub timing: TimingConfig,
}

impl Config {
    /// Default config file location under the user's config directory.
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("scan-node").join("config.json")
    }

    /// Load from disk; a missing file yields the defaults, a malformed one
    /// is an error.
    pub fn load(path: &Path) -> Result<Self, Error> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str(&contents)?;
                tracing::debug!("loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject any configuration the node hardware could not have run with:
    /// out-of-range or doubly-assigned GPIOs, a baud the scanner cannot
    /// speak, a dead broadcast port, a non-contiguous subnet mask.
    pub fn validate(&self) -> Result<(), Error> {
        let pins = [
            ("eth miso", self.wiring.miso),
            ("eth mosi", self.wiring.mosi),
            ("eth sclk", self.wiring.sclk),
            ("eth cs", self.wiring.cs),
            ("eth int", self.wiring.int),
            ("eth rst", self.wiring.rst),
            ("scanner rx", self.scanner.rx_pin),
            ("scanner tx", self.scanner.tx_pin),
        ];
        for (name, pin) in pins {
            if pin > MAX_GPIO {
                return Err(Error::InvalidPin { name, pin });
            }
        }
        for (i, &(a, pin_a)) in pins.iter().enumerate() {
            for &(b, pin_b) in &pins[i + 1..] {
                if pin_a == pin_b {
                    return Err(Error::PinConflict { a, b, pin: pin_a });
                }
            }
        }
        if !GM812_BAUD_RATES.contains(&self.scanner.baud) {
            return Err(Error::UnsupportedBaud(self.scanner.baud));
        }
        if self.broadcast.port == 0 {
            return Err(Error::ZeroPort);
        }
        if self.network.use_static_ip {
            let mask = u32::from(self.network.subnet);
            if mask.leading_ones() + mask.trailing_zeros() != 32 {
                return Err(Error::BadSubnetMask(self.network.subnet));
            }
        }
        Ok(())
    }

    pub fn broadcast_dest(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.broadcast.addr, self.broadcast.port)
    }

    pub fn node_id(&self) -> String {
        if let Some(id) = &self.broadcast.node_id {
            return id.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| {
                fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "scan-node".to_string())
    }

    pub fn log_summary(&self) {
        let w = &self.wiring;
        tracing::info!(
            miso = w.miso,
            mosi = w.mosi,
            sclk = w.sclk,
            cs = w.cs,
            int = w.int,
            rst = w.rst,
            "w5500 wiring"
        );
        if self.network.use_static_ip {
            tracing::info!(
                ip = %self.network.static_ip,
                gateway = %self.network.gateway,
                subnet = %self.network.subnet,
                dns1 = %self.network.dns1,
                dns2 = %self.network.dns2,
                "static network configuration"
            );
        } else {
            tracing::info!("network configuration via DHCP");
        }
        tracing::info!(
            device = %self.scanner.device,
            baud = self.scanner.baud,
            "scanner serial"
        );
    }
}
