pub const KB: u64 = 1_000;
pub const MB: u64 = 1_000 * KB;
pub const GB: u64 = 1_000 * MB;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ByteSizeError {
    #[error("byte size is empty")]
    Empty,
    #[error("invalid byte size number in `{0}`")]
    InvalidNumber(String),
    #[error("unknown byte size unit `{0}`")]
    UnknownUnit(String),
    #[error("byte size `{0}` overflows u64")]
    Overflow(String),
}

/// Parse a human byte size such as `512`, `100MB`, `1.5 GiB` or `8M`.
///
/// Decimal suffixes (`KB`, `MB`, `GB`, `TB`) are powers of 1000, binary
/// suffixes (`KiB`, `MiB`, `GiB`, `TiB`) and bare single letters (`K`, `M`,
/// `G`, `T`) are powers of 1024. Units are case-insensitive.
pub fn parse_byte_size(input: &str) -> Result<u64, ByteSizeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ByteSizeError::Empty);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number = number.replace('_', "");
    let unit = unit.trim();

    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => KB,
        "mb" => MB,
        "gb" => GB,
        "tb" => GB * 1_000,
        "k" | "kib" => KIB,
        "m" | "mib" => MIB,
        "g" | "gib" => GIB,
        "t" | "tib" => GIB * 1024,
        _ => return Err(ByteSizeError::UnknownUnit(unit.to_owned())),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| ByteSizeError::Overflow(trimmed.to_owned()));
    }

    let fractional: f64 = number
        .parse()
        .map_err(|_| ByteSizeError::InvalidNumber(trimmed.to_owned()))?;
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(ByteSizeError::Overflow(trimmed.to_owned()));
    }
    Ok(bytes.round() as u64)
}
