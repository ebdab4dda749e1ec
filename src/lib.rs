#![forbid(unsafe_code)]

//! Passive Real-time Asset Detection System.
//!
//! Observes traffic promiscuously and, without sending a single packet,
//! keeps an inventory of the hosts on the wire: the operating systems they
//! run (p0f-style TCP SYN/SYN+ACK, ICMP and UDP fingerprinting), the
//! services they offer (payload signatures), and the hardware behind them
//! (MAC vendor prefixes seen in ARP).

pub mod asset;
pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod icmp;
pub mod mac;
pub mod mtu;
pub mod packet;
pub mod parse;
pub mod persist;
pub mod service;
pub mod signature_matcher;
pub mod tcp;
pub mod ttl;
pub mod window_size;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::asset::{AssetStore, ServiceKind};
use crate::capture::Stats;
use crate::config::Config;
use crate::db::SignatureDb;
use crate::mtu::UNKNOWN_LINK;
use crate::packet::{dissect, Observation, ObservableArp, ObservableIcmp, ObservableTcp, ObservableUdp, TcpKind};
use crate::persist::AssetWriter;
use crate::service::{well_known_udp, ServiceMatch};
use crate::signature_matcher::SignatureMatcher;
use pcap::{Activated, Capture};
use tracing::{debug, info};

/// How often dirty assets are written through to the database.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// The capture-to-inventory engine. Single-threaded: the capture loop is
/// the only mutator, and signal flags are drained between frames.
pub struct Prads<'a> {
    config: &'a Config,
    db: &'a SignatureDb,
    matcher: SignatureMatcher<'a>,
    pub store: AssetStore,
    pub stats: Stats,
    pub writer: Option<AssetWriter>,
    /// timestamp of the newest frame seen; the flush cursor follows the
    /// capture timeline so replayed files persist correctly too.
    last_ts: u64,
}

impl<'a> Prads<'a> {
    pub fn new(
        config: &'a Config,
        db: &'a SignatureDb,
        store: AssetStore,
        writer: Option<AssetWriter>,
    ) -> Self {
        Prads {
            config,
            db,
            matcher: SignatureMatcher::new(db),
            store,
            stats: Stats::default(),
            writer,
            last_ts: 0,
        }
    }

    /// Pulls frames until shutdown is raised. The dump flag and the flush
    /// interval are serviced between frames, never inside one, so a HUP
    /// during dissection reports only after the frame completes.
    pub fn run<T: Activated + ?Sized>(
        &mut self,
        capture: &mut Capture<T>,
        shutdown: &Arc<AtomicBool>,
        dump_stats: &Arc<AtomicBool>,
    ) -> Result<(), error::PradsError> {
        let mut last_flush = Instant::now();

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, draining");
                break;
            }
            if dump_stats.swap(false, Ordering::Relaxed) {
                self.dump_stats(capture);
            }
            if self.writer.is_some() && last_flush.elapsed() >= FLUSH_INTERVAL {
                self.flush()?;
                last_flush = Instant::now();
            }

            match capture.next_packet() {
                Ok(frame) => {
                    let now = frame.header.ts.tv_sec.max(0) as u64;
                    self.process_frame(frame.data, now);
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.flush()?;
        self.dump_stats(capture);
        Ok(())
    }

    /// Writes dirty assets through to the database, if one is configured.
    pub fn flush(&mut self) -> Result<(), error::PradsError> {
        if let Some(writer) = self.writer.as_mut() {
            let now = if self.last_ts != 0 {
                self.last_ts
            } else {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
            };
            writer.flush(&self.store, now)?;
        }
        Ok(())
    }

    fn dump_stats<T: Activated + ?Sized>(&mut self, capture: &mut Capture<T>) {
        info!("{}", self.stats);
        if let Ok(ps) = capture.stats() {
            info!(
                received = ps.received,
                dropped = ps.dropped,
                if_dropped = ps.if_dropped,
                "pcap statistics"
            );
        }
    }

    /// One frame through dissection, matching and the asset store.
    pub fn process_frame(&mut self, frame: &[u8], now: u64) {
        self.stats.frames += 1;
        self.last_ts = self.last_ts.max(now);
        match dissect(frame) {
            Ok(Observation::Arp(arp)) => {
                self.stats.arp += 1;
                if self.config.arp {
                    self.handle_arp(&arp, now);
                }
            }
            Ok(Observation::Tcp(tcp)) => {
                self.stats.ipv4 += 1;
                self.stats.tcp += 1;
                self.handle_tcp(&tcp, now);
            }
            Ok(Observation::Udp(udp)) => {
                self.stats.ipv4 += 1;
                self.stats.udp += 1;
                self.handle_udp(&udp, now);
            }
            Ok(Observation::Icmp(icmp)) => {
                self.stats.ipv4 += 1;
                self.stats.icmp += 1;
                if self.config.icmp {
                    self.handle_icmp(&icmp, now);
                }
            }
            Err(e) => {
                debug!("dropped frame: {e}");
                self.stats.record_drop(&e);
            }
        }
    }

    fn handle_arp(&mut self, arp: &ObservableArp, now: u64) {
        let mac = arp.sender_mac.to_string();
        let (fp, vendor, details) = match self.db.mac.lookup(&mac) {
            Some(entry) => (
                entry.prefix.clone(),
                entry.vendor.clone(),
                entry.details.clone(),
            ),
            None => {
                let octets = arp.sender_mac.octets();
                let prefix = format!("{:02x}{:02x}{:02x}", octets[0], octets[1], octets[2]);
                (prefix, String::new(), String::new())
            }
        };
        self.store.update_asset(
            now,
            arp.sender_ip,
            ServiceKind::Arp,
            &fp,
            Some(mac),
            &vendor,
            &details,
            "ethernet",
            1,
        );
    }

    fn handle_tcp(&mut self, tcp: &ObservableTcp, now: u64) {
        if let Some(ref observed) = tcp.observation {
            let selection = match tcp.kind {
                TcpKind::Syn if self.config.os_syn_fingerprint => {
                    Some((ServiceKind::Syn, self.matcher.match_syn(observed)))
                }
                TcpKind::SynAck if self.config.os_synack_fingerprint => {
                    Some((ServiceKind::SynAck, self.matcher.match_synack(observed)))
                }
                // with response fingerprinting off, a SYN+ACK still runs
                // against the request signatures
                TcpKind::SynAck if self.config.os_syn_fingerprint => {
                    Some((ServiceKind::SynAck, self.matcher.match_syn(observed)))
                }
                _ => None,
            };
            if let Some((kind, matches)) = selection {
                if let Some(best) = matches.first() {
                    let link = self.db.mtu.link_for_mss(observed.mss);
                    self.store.update_asset(
                        now,
                        tcp.ip.src,
                        kind,
                        &observed.fp_string(),
                        None,
                        &best.os,
                        &best.details,
                        &link,
                        tcp.ip.distance,
                    );
                } else {
                    debug!(fp = %observed.fp_string(), src = %tcp.ip.src, "unknown tcp fingerprint");
                }
            }
        }

        if self.config.service_tcp && !tcp.payload.is_empty() {
            if let Some(service) = self.db.service_tcp.identify(&tcp.payload) {
                self.record_service(now, tcp.ip.src, tcp.src_port, ServiceKind::ServiceTcp, tcp.ip.distance, &service);
            }
        }
    }

    fn handle_udp(&mut self, udp: &ObservableUdp, now: u64) {
        if self.config.os_udp {
            if let Some((os, details)) = self.matcher.match_udp(udp) {
                self.store.update_asset(
                    now,
                    udp.ip.src,
                    ServiceKind::Udp,
                    &udp.fp_string(),
                    None,
                    &os,
                    &details,
                    UNKNOWN_LINK,
                    udp.ip.distance,
                );
            }
        }

        // regex matching and the hard-wired well-known ports are mutually
        // exclusive; the latter only covers for the former being off
        let service = if self.config.service_udp {
            self.db.service_udp.identify(&udp.payload)
        } else {
            well_known_udp(udp.src_port)
        };
        if let Some(service) = service {
            self.record_service(now, udp.ip.src, udp.src_port, ServiceKind::ServiceUdp, udp.ip.distance, &service);
        }
    }

    fn handle_icmp(&mut self, icmp: &ObservableIcmp, now: u64) {
        let (os, details) = if self.config.os_icmp {
            self.matcher.match_icmp(icmp)
        } else {
            ("UNKNOWN".to_string(), "UNKNOWN".to_string())
        };
        self.store.update_asset(
            now,
            icmp.ip.src,
            ServiceKind::Icmp,
            &icmp.fp_string(),
            None,
            &os,
            &details,
            UNKNOWN_LINK,
            icmp.ip.distance,
        );
    }

    fn record_service(
        &mut self,
        now: u64,
        ip: std::net::Ipv4Addr,
        port: u16,
        kind: ServiceKind,
        distance: u8,
        service: &ServiceMatch,
    ) {
        let details = [service.version.as_str(), service.info.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        self.store.update_asset(
            now,
            ip,
            kind,
            &format!("{ip}:{port}"),
            None,
            &service.vendor,
            &details,
            UNKNOWN_LINK,
            distance,
        );
    }
}
