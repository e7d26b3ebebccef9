use eyre::Context as _;

/// Nanounits per whole coin.
pub const NANO_DECIMALS: u32 = 9;

/// Parse an unsigned integer amount in nanounits.
///
/// Comparison happens on the parsed integer, so `"0"` and `"00"` are the same balance.
pub fn parse_nano(s: &str) -> eyre::Result<u128> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    let v: u128 = s.parse().context("parse nano amount")?;
    Ok(v)
}

/// Parse a signed transaction delta in nanounits (negative for outgoing value).
pub fn parse_nano_signed(s: &str) -> eyre::Result<i128> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    let v: i128 = s.parse().context("parse signed nano amount")?;
    Ok(v)
}

/// Format a nanounit integer as a whole-coin decimal string without using floats.
///
/// Examples:
/// - 1500000000 => "1.5"
/// - 1 => "0.000000001"
pub fn format_nano(nano: u128) -> String {
    let scale = 10_u128.pow(NANO_DECIMALS);
    let whole = nano / scale;
    let frac = nano % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let mut frac_s = format!("{frac:0width$}", width = NANO_DECIMALS as usize);
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    format!("{whole}.{frac_s}")
}
