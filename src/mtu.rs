use std::collections::HashMap;

use crate::error::PradsError;

pub const UNKNOWN_LINK: &str = "UNKNOWN";

/// Maps an MTU to a human label for the link it implies, e.g. 1500 to
/// `"ethernet"` or 1492 to `"pppoe (DSL)"`.
#[derive(Debug, Default)]
pub struct MtuDb {
    links: HashMap<u16, String>,
}

impl MtuDb {
    /// Parses `mtu,"description"` records. Comments (`#`) and blank lines are
    /// skipped; anything else malformed is fatal.
    pub fn parse(name: &str, content: &str) -> Result<Self, PradsError> {
        let mut links = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = strip_comment(line);
            if line.is_empty() {
                continue;
            }
            let (mtu, description) = line.split_once(',').ok_or_else(|| PradsError::Signature {
                file: name.to_string(),
                line: lineno + 1,
                message: "expected mtu,\"description\"".to_string(),
            })?;
            let mtu: u16 = mtu.trim().parse().map_err(|_| PradsError::Signature {
                file: name.to_string(),
                line: lineno + 1,
                message: format!("bad mtu value: {mtu}"),
            })?;
            let description = description.trim().trim_matches('"').trim().to_string();
            links.insert(mtu, description);
        }
        Ok(MtuDb { links })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link label for a connection whose SYN advertised `mss`: the implied
    /// MTU is `mss + 40`.
    pub fn link_for_mss(&self, mss: Option<u16>) -> String {
        mss.and_then(|mss| self.links.get(&mss.saturating_add(40)))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_LINK.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u16, &String)> {
        self.links.iter()
    }
}

pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => line[..pos].trim(),
        None => line.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# implied link types
1500,"ethernet"
1492,"pppoe (DSL)"  # common for DSL lines
1460,"Tunnel or PPTP"
"#;

    #[test]
    fn parse_and_lookup() {
        let db = MtuDb::parse("mtu.sig", SAMPLE).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.link_for_mss(Some(1460)), "ethernet");
        assert_eq!(db.link_for_mss(Some(1452)), "pppoe (DSL)");
        assert_eq!(db.link_for_mss(Some(100)), UNKNOWN_LINK);
        assert_eq!(db.link_for_mss(None), UNKNOWN_LINK);
    }

    #[test]
    fn malformed_record_is_fatal() {
        assert!(MtuDb::parse("mtu.sig", "not a record").is_err());
        assert!(MtuDb::parse("mtu.sig", "xyz,\"desc\"").is_err());
    }
}
