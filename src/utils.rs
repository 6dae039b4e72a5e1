/// Get library version
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Space-separated uppercase hex, e.g. `90 AF 00 00 00`.
pub fn to_hex(bytes: &[u8]) -> String {
    join_hex(bytes, " ")
}

/// Colon-separated uppercase hex, the way UIDs are displayed.
pub fn uid_string(uid: &[u8]) -> String {
    join_hex(uid, ":")
}

fn join_hex(bytes: &[u8], sep: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Extract the historical bytes from an ISO 7816-3 ATR.
///
/// Walks the TA/TB/TC/TD interface bytes to find where the historical bytes
/// start; `T0`'s low nibble gives their count. Returns `None` when the ATR is
/// too short for the declared layout.
pub fn historical_bytes(atr: &[u8]) -> Option<Vec<u8>> {
    let t0 = *atr.get(1)?;
    let count = usize::from(t0 & 0x0F);

    let mut idx = 2;
    let mut indicator = t0;
    loop {
        // TA, TB, TC present bits
        for bit in [0x10u8, 0x20, 0x40] {
            if indicator & bit != 0 {
                idx += 1;
            }
        }
        if indicator & 0x80 == 0 {
            break;
        }
        indicator = *atr.get(idx)?;
        idx += 1;
    }

    atr.get(idx..idx + count).map(<[u8]>::to_vec)
}
