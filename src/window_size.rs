use crate::tcp::WssSpec;

/// Expresses an observed window size in terms of the MSS, following p0f:
/// a clean multiple of the MSS becomes `S<n>`, a clean multiple of the
/// MTU (MSS + 40) becomes `T<n>`, anything else stays a literal.
pub fn normalize_wss(winsize: u16, mss: Option<u16>) -> WssSpec {
    let winsize = u32::from(winsize);
    if let Some(mss) = mss.filter(|&m| m > 0) {
        let mss = u32::from(mss);
        if winsize % mss == 0 {
            return WssSpec::Mss(winsize / mss);
        }
        if winsize % (mss + 40) == 0 {
            return WssSpec::Mtu(winsize / (mss + 40));
        }
    }
    WssSpec::Value(winsize)
}
