use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{Config, SERIAL_TIMEOUT_MS};
use crate::error::Error;
use crate::event::ScanEvent;

pub enum ScannerCommand {
    Disconnect,
}

/// GM65-family "query device" frame; any live module answers it.
const PROBE_QUERY: [u8; 9] = [0x7E, 0x00, 0x07, 0x01, 0x00, 0x00, 0x01, 0xAB, 0xCD];
/// Leading bytes of the module's answer frame.
const PROBE_ACK: [u8; 4] = [0x02, 0x00, 0x00, 0x01];
const PROBE_WAIT: Duration = Duration::from_secs(2);

/// Open the scanner port, probe the module, then hand the port to a reader
/// thread that turns the byte stream into [`ScanEvent`]s on `events`.
pub fn start_scanner_thread(
    config: &Config,
    events: mpsc::Sender<ScanEvent>,
) -> Result<mpsc::Sender<ScannerCommand>, Error> {
    let mut port = serialport::new(config.scanner.device.as_str(), config.scanner.baud)
        .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()?;

    probe_scanner(&mut port)?;
    tracing::info!(
        device = %config.scanner.device,
        baud = config.scanner.baud,
        "scanner ready"
    );

    let (tx, rx) = mpsc::channel();
    let node = config.node_id();
    let quiet = Duration::from_millis(config.timing.barcode_quiet_ms);
    thread::spawn(move || {
        scan_loop(port, events, rx, node, quiet);
    });

    Ok(tx)
}

fn scan_loop(
    mut port: Box<dyn SerialPort>,
    events: mpsc::Sender<ScanEvent>,
    commands: mpsc::Receiver<ScannerCommand>,
    node: String,
    quiet: Duration,
) {
    let mut framer = Framer::new(quiet);
    let mut serial_buf = vec![0u8; 256];
    let mut seq: u64 = 0;

    loop {
        if let Ok(ScannerCommand::Disconnect) = commands.try_recv() {
            tracing::info!("disconnecting from scanner");
            break;
        }

        // Read timeouts are the idle tick that lets quiet-time expiry run.
        let n = match port.read(&mut serial_buf) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => {
                tracing::error!("scanner read failed: {e}");
                break;
            }
        };

        for barcode in framer.push(&serial_buf[..n], Instant::now()) {
            seq += 1;
            let event = ScanEvent::new(node.clone(), seq, barcode);
            if events.send(event).is_err() {
                // main loop is gone
                return;
            }
        }
    }
    tracing::info!("scanner thread exited");
}

/// Send the query frame and wait a bounded time for the answer. Scan noise
/// already in flight may be interleaved with it, so search rather than
/// compare from the front.
fn probe_scanner(port: &mut Box<dyn SerialPort>) -> Result<(), Error> {
    port.write_all(&PROBE_QUERY)?;

    let mut seen: Vec<u8> = Vec::new();
    let mut buf = [0u8; 64];
    let start = Instant::now();
    while start.elapsed() < PROBE_WAIT {
        match port.read(&mut buf) {
            Ok(n) if n > 0 => {
                seen.extend_from_slice(&buf[..n]);
                if seen.windows(PROBE_ACK.len()).any(|w| w == PROBE_ACK) {
                    return Ok(());
                }
            }
            Ok(_) => thread::sleep(Duration::from_millis(10)),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
    if !seen.is_empty() {
        tracing::debug!("probe got unexpected bytes: {}", hex::encode(&seen));
    }
    Err(Error::ScannerProbe)
}

/// Splits the scanner byte stream into one payload per physical scan.
///
/// A frame closes on a CR/LF terminator, or once `quiet` has elapsed after
/// the most recent byte with data still pending. Scans whose bytes arrive
/// back-to-back stay whole; scans separated by more than the quiet time
/// never merge.
struct Framer {
    quiet: Duration,
    buf: Vec<u8>,
    last_byte: Option<Instant>,
}

impl Framer {
    fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            buf: Vec::new(),
            last_byte: None,
        }
    }

    fn push(&mut self, bytes: &[u8], now: Instant) -> Vec<String> {
        let mut out = Vec::new();

        // A pending frame older than the quiet time closes before any new
        // bytes are considered part of it.
        if !self.buf.is_empty() {
            if let Some(last) = self.last_byte {
                if now.duration_since(last) >= self.quiet {
                    out.extend(self.take_frame());
                }
            }
        }

        for &b in bytes {
            match b {
                b'\n' | b'\r' => out.extend(self.take_frame()),
                _ => self.buf.push(b),
            }
        }
        if !bytes.is_empty() {
            self.last_byte = Some(now);
        }

        out
    }

    fn take_frame(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        match String::from_utf8(raw) {
            Ok(s) => {
                let s = s.trim().to_string();
                if s.is_empty() { None } else { Some(s) }
            }
            Err(e) => {
                tracing::warn!(
                    "dropping non-utf8 scan payload: {}",
                    hex::encode(e.as_bytes())
                );
                None
            }
        }
    }
}
