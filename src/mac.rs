use std::collections::HashMap;

use crate::error::PradsError;
use crate::mtu::strip_comment;

/// Vendor data stored at a trie position.
#[derive(Clone, Debug, PartialEq)]
pub struct MacEntry {
    /// The prefix that was installed, as lowercase hex without separators.
    /// Assets record this as their fingerprint.
    pub prefix: String,
    pub vendor: String,
    pub details: String,
}

#[derive(Debug, Default)]
struct MacNode {
    children: HashMap<u8, MacNode>,
    /// The "match here" slot, so a longer prefix can nest beneath a shorter one.
    here: Option<MacEntry>,
    /// Masked terminals: (byte value, significant high bits, entry).
    masks: Vec<(u8, u8, MacEntry)>,
}

/// Radix trie over MAC address bytes with optional bit-mask leaves,
/// in the `prads-ether-codes` format: `prefix[/bits]  vendor  details`.
#[derive(Debug, Default)]
pub struct MacDb {
    root: MacNode,
    entries: usize,
}

impl MacDb {
    pub fn parse(name: &str, content: &str) -> Result<Self, PradsError> {
        let mut db = MacDb::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            db.insert_line(line).map_err(|message| PradsError::Signature {
                file: name.to_string(),
                line: lineno + 1,
                message,
            })?;
        }
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn insert_line(&mut self, line: &str) -> Result<(), String> {
        let mut fields = line.splitn(2, char::is_whitespace);
        let prefix = fields.next().ok_or("missing prefix")?;
        let rest = fields.next().unwrap_or("").trim();
        let mut rest = rest.splitn(2, char::is_whitespace);
        let vendor = rest.next().unwrap_or("").to_string();
        if vendor.is_empty() {
            return Err("missing vendor".to_string());
        }
        let details = rest.next().unwrap_or("").trim().to_string();

        let (prefix, bits) = match prefix.split_once('/') {
            Some((p, b)) => {
                let bits: u8 = b.parse().map_err(|_| format!("bad mask bits: {b}"))?;
                if bits == 0 || bits > 48 {
                    return Err(format!("mask bits out of range: {bits}"));
                }
                (p, bits)
            }
            None => (prefix, 48),
        };

        let mut bytes = Vec::new();
        for tok in prefix.split(['.', ':', '-']) {
            if tok.is_empty() {
                continue;
            }
            let byte = u8::from_str_radix(tok, 16).map_err(|_| format!("bad hex byte: {tok}"))?;
            bytes.push(byte);
        }
        if bytes.is_empty() {
            return Err("empty prefix".to_string());
        }
        // bytes beyond the mask carry no information
        bytes.truncate(usize::from(bits.div_ceil(8)));

        let rem = bits % 8;
        let canonical: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        let entry = MacEntry {
            prefix: canonical,
            vendor,
            details,
        };

        let mut node = &mut self.root;
        let whole_bytes = if rem == 0 { bytes.len() } else { bytes.len() - 1 };
        for &b in &bytes[..whole_bytes] {
            node = node.children.entry(b).or_default();
        }
        if rem == 0 {
            node.here = Some(entry);
        } else {
            let last = bytes[whole_bytes];
            node.masks.push((last, rem, entry));
        }
        self.entries += 1;
        Ok(())
    }

    /// Resolves a printable MAC (`:`, `.` or `-` separated) to the most
    /// specific installed vendor entry.
    pub fn lookup(&self, mac: &str) -> Option<&MacEntry> {
        let mut bytes = Vec::new();
        for tok in mac.split(['.', ':', '-']) {
            if tok.is_empty() {
                continue;
            }
            bytes.push(u8::from_str_radix(tok, 16).ok()?);
        }
        Self::descend(&self.root, &bytes)
    }

    fn descend<'a>(node: &'a MacNode, bytes: &[u8]) -> Option<&'a MacEntry> {
        if let Some(&b) = bytes.first() {
            // longest prefix first
            if let Some(child) = node.children.get(&b) {
                if let Some(entry) = Self::descend(child, &bytes[1..]) {
                    return Some(entry);
                }
            }
        }
        if let Some(ref entry) = node.here {
            return Some(entry);
        }
        if let Some(&b) = bytes.first() {
            for (value, bits, entry) in &node.masks {
                let shift = 8 - bits;
                if b >> shift == value >> shift {
                    return Some(entry);
                }
            }
        }
        None
    }
}
