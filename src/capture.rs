use std::fmt;

use crate::error::PradsError;
use pcap::{Active, Capture, Offline};
use tracing::debug;

/// Snap length large enough for any ethernet frame we care about.
pub const SNAPLEN: i32 = 65535;
/// Read timeout; the loop wakes this often to drain pending signals.
pub const READ_TIMEOUT_MS: i32 = 500;

/// Opens the interface promiscuously and installs the BPF filter from the
/// configuration. Every failure here is fatal for startup.
pub fn open_live(interface: &str, bpfilter: &str) -> Result<Capture<Active>, PradsError> {
    let mut capture = Capture::from_device(interface)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .open()?;
    if !bpfilter.is_empty() {
        capture.filter(bpfilter, true)?;
    }
    debug!(interface, "capture opened");
    Ok(capture)
}

/// Replays a capture file through the same pipeline.
pub fn open_file(path: &str, bpfilter: &str) -> Result<Capture<Offline>, PradsError> {
    let mut capture = Capture::from_file(path)?;
    if !bpfilter.is_empty() {
        capture.filter(bpfilter, true)?;
    }
    Ok(capture)
}

/// Frame counters kept by the engine, printed on SIGHUP and at shutdown.
#[derive(Debug, Default)]
pub struct Stats {
    pub frames: u64,
    pub arp: u64,
    pub ipv4: u64,
    pub tcp: u64,
    pub udp: u64,
    pub icmp: u64,
    /// IPv4 protocols we do not dissect.
    pub other_ip: u64,
    /// ethertypes we do not dissect (IPv6 lands here).
    pub other_link: u64,
    /// frames too short for their advertised headers.
    pub truncated: u64,
}

impl Stats {
    pub fn record_drop(&mut self, error: &PradsError) {
        match error {
            PradsError::UnsupportedEthernetType(_) => self.other_link += 1,
            PradsError::UnsupportedProtocol(_) => self.other_ip += 1,
            PradsError::Truncated(_) => self.truncated += 1,
            _ => {}
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames:{} arp:{} ipv4:{} tcp:{} udp:{} icmp:{} other-ip:{} other-link:{} truncated:{}",
            self.frames,
            self.arp,
            self.ipv4,
            self.tcp,
            self.udp,
            self.icmp,
            self.other_ip,
            self.other_link,
            self.truncated
        )
    }
}
