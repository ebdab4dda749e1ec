use std::collections::HashMap;

use crate::error::PradsError;
use crate::mtu::strip_comment;
use regex::bytes::Regex;
use tracing::debug;

/// A compiled service signature: `service,template,regex`.
///
/// The template interpolates regex capture groups (`$1`..`$9`) and splits on
/// `/` into vendor, version and info.
#[derive(Debug)]
pub struct ServiceSig {
    pub service: String,
    pub template: String,
    pub pattern: Regex,
}

/// What a payload matched as.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceMatch {
    pub service: String,
    pub vendor: String,
    pub version: String,
    pub info: String,
}

/// An ordered service signature list. Signatures are deduplicated by regex
/// text and scanned longest-regex-first so the most specific match wins.
#[derive(Debug, Default)]
pub struct ServiceDb {
    sigs: Vec<ServiceSig>,
}

impl ServiceDb {
    pub fn parse(name: &str, content: &str) -> Result<Self, PradsError> {
        let mut seen: HashMap<String, ServiceSig> = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, ',');
            let (service, template, pattern) =
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(s), Some(t), Some(p)) => (s.trim(), t.trim(), p.trim()),
                    _ => {
                        return Err(PradsError::Signature {
                            file: name.to_string(),
                            line: lineno + 1,
                            message: "expected service,template,regex".to_string(),
                        })
                    }
                };
            let template = template.strip_prefix("v/").unwrap_or(template);
            let template = template.strip_suffix('/').unwrap_or(template);
            let regex = Regex::new(pattern).map_err(|e| PradsError::Signature {
                file: name.to_string(),
                line: lineno + 1,
                message: format!("bad regex: {e}"),
            })?;
            seen.insert(
                pattern.to_string(),
                ServiceSig {
                    service: service.to_string(),
                    template: template.to_string(),
                    pattern: regex,
                },
            );
        }

        let mut sigs: Vec<ServiceSig> = seen.into_values().collect();
        sigs.sort_by(|a, b| {
            b.pattern
                .as_str()
                .len()
                .cmp(&a.pattern.as_str().len())
                .then_with(|| a.pattern.as_str().cmp(b.pattern.as_str()))
        });
        Ok(ServiceDb { sigs })
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceSig> {
        self.sigs.iter()
    }

    /// Scans the payload against every signature in order; the first regex
    /// that matches produces the service identification.
    pub fn identify(&self, payload: &[u8]) -> Option<ServiceMatch> {
        for sig in &self.sigs {
            if let Some(caps) = sig.pattern.captures(payload) {
                let mut interpolated = sig.template.clone();
                // highest group first so $1 does not eat the prefix of $10
                for group in (1..caps.len()).rev() {
                    let value = caps
                        .get(group)
                        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                        .unwrap_or_default();
                    interpolated = interpolated.replace(&format!("${group}"), &value);
                }
                let mut parts = interpolated.splitn(3, '/');
                let vendor = parts.next().unwrap_or("").trim().to_string();
                let version = parts.next().unwrap_or("").trim().to_string();
                let info = parts.next().unwrap_or("").trim().to_string();
                debug!(service = %sig.service, %vendor, "service signature matched");
                return Some(ServiceMatch {
                    service: sig.service.clone(),
                    vendor,
                    version,
                    info,
                });
            }
        }
        None
    }
}

/// Hard-wired UDP identifications, used only when regex-based UDP service
/// matching is turned off.
pub fn well_known_udp(src_port: u16) -> Option<ServiceMatch> {
    let (vendor, info) = match src_port {
        53 => ("-", "DNS"),
        1194 => ("-", "OpenVPN"),
        _ => return None,
    };
    Some(ServiceMatch {
        service: "@udp".to_string(),
        vendor: vendor.to_string(),
        version: String::new(),
        info: info.to_string(),
    })
}
