use std::path::Path;

use crate::error::PradsError;
use crate::mtu::strip_comment;
use tracing::warn;

/// Runtime configuration: `key = value` file with `#` comments, every key
/// optional, CLI flags applied on top by the binary.
#[derive(Clone, Debug)]
pub struct Config {
    pub daemon: bool,
    pub arp: bool,
    pub service_tcp: bool,
    /// accepted but unused, reserved for client-side service matching.
    pub client_tcp: bool,
    pub service_udp: bool,
    pub os_syn_fingerprint: bool,
    pub os_synack_fingerprint: bool,
    /// reserved; ACK stream fingerprinting is not implemented.
    pub os_ack_fingerprint: bool,
    /// reserved; RST fingerprinting is not implemented.
    pub os_rst_fingerprint: bool,
    /// reserved; FIN fingerprinting is not implemented.
    pub os_fin_fingerprint: bool,
    pub os_udp: bool,
    pub icmp: bool,
    pub os_icmp: bool,
    pub log_file: String,
    pub pid_file: String,
    /// asset records go here instead of stdout when set.
    pub asset_log: String,
    /// signature file paths; empty means the embedded default.
    pub sig_file_syn: String,
    pub sig_file_synack: String,
    pub sig_file_serv_tcp: String,
    /// reserved alongside `client_tcp`.
    pub sig_file_cli_tcp: String,
    pub sig_file_serv_udp: String,
    /// reserved alongside `client_tcp`.
    pub sig_file_cli_udp: String,
    pub sig_file_icmp: String,
    pub sig_file_udp: String,
    pub sig_file_mtu: String,
    pub mac_file: String,
    /// reserved; privilege dropping is handled outside the core.
    pub user: String,
    pub group: String,
    pub interface: String,
    pub bpfilter: String,
    /// SQLite database path; empty disables persistence.
    pub db: String,
    /// accepted for driver compatibility; SQLite ignores them.
    pub db_username: String,
    pub db_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            daemon: false,
            arp: true,
            service_tcp: true,
            client_tcp: true,
            service_udp: true,
            os_syn_fingerprint: true,
            os_synack_fingerprint: true,
            os_ack_fingerprint: false,
            os_rst_fingerprint: false,
            os_fin_fingerprint: false,
            os_udp: true,
            icmp: true,
            os_icmp: true,
            log_file: String::new(),
            pid_file: String::new(),
            asset_log: String::new(),
            sig_file_syn: String::new(),
            sig_file_synack: String::new(),
            sig_file_serv_tcp: String::new(),
            sig_file_cli_tcp: String::new(),
            sig_file_serv_udp: String::new(),
            sig_file_cli_udp: String::new(),
            sig_file_icmp: String::new(),
            sig_file_udp: String::new(),
            sig_file_mtu: String::new(),
            mac_file: String::new(),
            user: String::new(),
            group: String::new(),
            interface: "eth0".to_string(),
            bpfilter: String::new(),
            db: String::new(),
            db_username: String::new(),
            db_password: String::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, PradsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PradsError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, PradsError> {
        let mut config = Config::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                PradsError::Config(format!("line {}: expected key = value", lineno + 1))
            })?;
            let key = key.trim();
            let value = value.trim();
            config.set(key, value, lineno + 1)?;
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str, lineno: usize) -> Result<(), PradsError> {
        let flag = |value: &str| -> Result<bool, PradsError> {
            match value {
                "0" => Ok(false),
                "1" => Ok(true),
                other => Err(PradsError::Config(format!(
                    "line {lineno}: {key} expects 0 or 1, got {other}"
                ))),
            }
        };

        match key {
            "daemon" => self.daemon = flag(value)?,
            "arp" => self.arp = flag(value)?,
            "service_tcp" => self.service_tcp = flag(value)?,
            "client_tcp" => self.client_tcp = flag(value)?,
            "service_udp" => self.service_udp = flag(value)?,
            "os_syn_fingerprint" => self.os_syn_fingerprint = flag(value)?,
            "os_synack_fingerprint" => self.os_synack_fingerprint = flag(value)?,
            "os_ack_fingerprint" => self.os_ack_fingerprint = flag(value)?,
            "os_rst_fingerprint" => self.os_rst_fingerprint = flag(value)?,
            "os_fin_fingerprint" => self.os_fin_fingerprint = flag(value)?,
            "os_udp" => self.os_udp = flag(value)?,
            "icmp" => self.icmp = flag(value)?,
            "os_icmp" => self.os_icmp = flag(value)?,
            "log_file" => self.log_file = value.to_string(),
            "pid_file" => self.pid_file = value.to_string(),
            "asset_log" => self.asset_log = value.to_string(),
            "sig_file_syn" => self.sig_file_syn = value.to_string(),
            "sig_file_synack" => self.sig_file_synack = value.to_string(),
            "sig_file_serv_tcp" => self.sig_file_serv_tcp = value.to_string(),
            "sig_file_cli_tcp" => self.sig_file_cli_tcp = value.to_string(),
            "sig_file_serv_udp" => self.sig_file_serv_udp = value.to_string(),
            "sig_file_cli_udp" => self.sig_file_cli_udp = value.to_string(),
            "sig_file_icmp" => self.sig_file_icmp = value.to_string(),
            "sig_file_udp" => self.sig_file_udp = value.to_string(),
            "sig_file_mtu" => self.sig_file_mtu = value.to_string(),
            "mac_file" => self.mac_file = value.to_string(),
            "user" => self.user = value.to_string(),
            "group" => self.group = value.to_string(),
            "interface" => self.interface = value.to_string(),
            "bpfilter" => self.bpfilter = value.to_string(),
            "db" => self.db = value.to_string(),
            "db_username" => self.db_username = value.to_string(),
            "db_password" => self.db_password = value.to_string(),
            other => warn!(key = other, "unknown configuration key, ignoring"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = Config::parse("").unwrap();
        assert!(config.arp);
        assert!(!config.daemon);
        assert_eq!(config.interface, "eth0");
        assert!(config.db.is_empty());
    }

    #[test]
    fn file_overrides_defaults() {
        let config = Config::parse(
            "# prads config\n\
             interface = wlan0\n\
             arp = 0\n\
             bpfilter = not port 22   # ignore ssh\n\
             db = /var/lib/prads/assets.db\n",
        )
        .unwrap();
        assert_eq!(config.interface, "wlan0");
        assert!(!config.arp);
        assert_eq!(config.bpfilter, "not port 22");
        assert_eq!(config.db, "/var/lib/prads/assets.db");
    }

    #[test]
    fn bad_boolean_is_fatal() {
        assert!(Config::parse("arp = yes").is_err());
    }

    #[test]
    fn missing_equals_is_fatal() {
        assert!(Config::parse("interface wlan0").is_err());
    }
}
