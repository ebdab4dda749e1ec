use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::Ipv4Addr;

use tracing::error;

/// The kind of sighting an asset record represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    Arp,
    Syn,
    SynAck,
    Icmp,
    Udp,
    ServiceTcp,
    ServiceUdp,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceKind::Arp => "ARP",
            ServiceKind::Syn => "SYN",
            ServiceKind::SynAck => "SYNACK",
            ServiceKind::Icmp => "ICMP",
            ServiceKind::Udp => "UDP",
            ServiceKind::ServiceTcp => "SERVICE_TCP",
            ServiceKind::ServiceUdp => "SERVICE_UDP",
        };
        f.write_str(s)
    }
}

/// One tracked asset. Distinct fingerprints on the same address coexist as
/// separate entries, so a NAT fronting several stacks shows every one.
#[derive(Clone, Debug)]
pub struct Asset {
    pub ip: Ipv4Addr,
    pub service: ServiceKind,
    pub first_seen: u64,
    pub last_seen: u64,
    pub fp: String,
    pub mac: Option<String>,
    pub os: String,
    pub details: String,
    pub link: String,
    pub distance: u8,
}

/// Where new-asset records are written.
pub enum AssetSink {
    Stdout,
    File(File),
    Buffer(Vec<u8>),
}

impl AssetSink {
    pub fn file(path: &str) -> io::Result<Self> {
        Ok(AssetSink::File(
            OpenOptions::new().create(true).append(true).open(path)?,
        ))
    }
}

impl Write for AssetSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AssetSink::Stdout => io::stdout().write(buf),
            AssetSink::File(f) => f.write(buf),
            AssetSink::Buffer(b) => b.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            AssetSink::Stdout => io::stdout().flush(),
            AssetSink::File(f) => f.flush(),
            AssetSink::Buffer(_) => Ok(()),
        }
    }
}

/// In-memory asset inventory keyed by `service:ip:fingerprint`.
///
/// The record line for a key is written exactly once, when the key first
/// appears; later sightings only refresh the mutable fields and the
/// last-seen stamp.
pub struct AssetStore {
    assets: HashMap<String, Asset>,
    sink: AssetSink,
}

impl AssetStore {
    pub fn new(sink: AssetSink) -> Self {
        AssetStore {
            assets: HashMap::new(),
            sink,
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Records a sighting. `os`/`details` that are empty or "unknown" in any
    /// case normalize to `"?"`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_asset(
        &mut self,
        now: u64,
        ip: Ipv4Addr,
        service: ServiceKind,
        fp: &str,
        mac: Option<String>,
        os: &str,
        details: &str,
        link: &str,
        distance: u8,
    ) {
        let os = normalize_label(os);
        let details = normalize_label(details);
        let key = format!("{service}:{ip}:{fp}");

        match self.assets.get_mut(&key) {
            Some(asset) => {
                asset.last_seen = now;
                asset.os = os;
                asset.details = details;
                asset.link = link.to_string();
                asset.distance = distance;
                if mac.is_some() {
                    asset.mac = mac;
                }
            }
            None => {
                let asset = Asset {
                    ip,
                    service,
                    first_seen: now,
                    last_seen: now,
                    fp: fp.to_string(),
                    mac,
                    os,
                    details,
                    link: link.to_string(),
                    distance,
                };
                if let Err(e) = write_record(&mut self.sink, &asset) {
                    error!("cannot write asset record: {e}");
                }
                self.assets.insert(key, asset);
            }
        }
    }

    /// The buffered output, when the sink is a test buffer.
    pub fn sink_buffer(&self) -> Option<&[u8]> {
        match &self.sink {
            AssetSink::Buffer(b) => Some(b),
            _ => None,
        }
    }
}

fn normalize_label(label: &str) -> String {
    if label.is_empty() || label.eq_ignore_ascii_case("unknown") {
        "?".to_string()
    } else {
        label.to_string()
    }
}

fn write_record(sink: &mut AssetSink, asset: &Asset) -> io::Result<()> {
    writeln!(
        sink,
        "{:11} [{:<8}] ip:{:<15} {} - {} [{}] distance:{} link:{}",
        asset.last_seen,
        asset.service.to_string(),
        asset.ip.to_string(),
        asset.os,
        asset.details,
        asset.fp,
        asset.distance,
        asset.link
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AssetStore {
        AssetStore::new(AssetSink::Buffer(Vec::new()))
    }

    #[test]
    fn record_written_once_per_key() {
        let mut store = store();
        let ip: Ipv4Addr = "10.0.0.5".parse().unwrap();
        for t in 0..3 {
            store.update_asset(
                1700000000 + t,
                ip,
                ServiceKind::Syn,
                "S4:64:1:60:M1460,S,T0,N,W7:.",
                None,
                "Linux",
                "2.6",
                "ethernet",
                0,
            );
        }
        let output = String::from_utf8(store.sink_buffer().unwrap().to_vec()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert_eq!(store.len(), 1);
        let asset = store.iter().next().unwrap();
        assert_eq!(asset.first_seen, 1700000000);
        assert_eq!(asset.last_seen, 1700000002);
    }

    #[test]
    fn distinct_fingerprints_coexist() {
        let mut store = store();
        let ip: Ipv4Addr = "10.0.0.5".parse().unwrap();
        store.update_asset(1, ip, ServiceKind::Syn, "fp-a", None, "Linux", "2.6", "ethernet", 0);
        store.update_asset(2, ip, ServiceKind::Syn, "fp-b", None, "Linux", "3.x", "ethernet", 0);
        store.update_asset(3, ip, ServiceKind::SynAck, "fp-a", None, "Linux", "2.6", "ethernet", 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn unknown_normalizes_to_question_mark() {
        let mut store = store();
        let ip: Ipv4Addr = "192.168.1.1".parse().unwrap();
        store.update_asset(1, ip, ServiceKind::Icmp, "8:0:64:1:0:84:2:0:0", None, "UNKNOWN", "", "UNKNOWN", 0);
        let asset = store.iter().next().unwrap();
        assert_eq!(asset.os, "?");
        assert_eq!(asset.details, "?");
        let output = String::from_utf8(store.sink_buffer().unwrap().to_vec()).unwrap();
        assert!(output.contains("? - ?"));
    }

    #[test]
    fn record_format_is_fixed_width() {
        let mut store = store();
        let ip: Ipv4Addr = "10.0.0.5".parse().unwrap();
        store.update_asset(
            1234567890,
            ip,
            ServiceKind::Arp,
            "001b21",
            Some("00:1b:21:aa:bb:cc".to_string()),
            "Intel",
            "Intel Corporate",
            "ethernet",
            1,
        );
        let output = String::from_utf8(store.sink_buffer().unwrap().to_vec()).unwrap();
        assert_eq!(
            output,
            " 1234567890 [ARP     ] ip:10.0.0.5        Intel - Intel Corporate [001b21] distance:1 link:ethernet\n"
        );
    }
}
