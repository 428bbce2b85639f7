//! Argument parsers for numeric and hex inputs

/// Parse a number written in decimal or with a `0x` prefix
pub fn parse_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("'{}' is not a 16-bit number", s))
}

pub fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_u16(s)?;
    u8::try_from(value).map_err(|_| format!("'{}' does not fit in a byte", s.trim()))
}

/// Parse a hex byte string such as `01ff`, `01 ff` or `01:ff`
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("'{}' is not valid hex", s));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("'{}' has an odd number of hex digits", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("'{}' is not valid hex", s))
        })
        .collect()
}

/// A hex argument decoded to bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn parse(s: &str) -> Result<Self, String> {
        parse_hex_bytes(s).map(HexBytes)
    }
}

/// Format bytes as space separated hex
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("0x04d8"), Ok(0x04d8));
        assert_eq!(parse_u16("0XFA2E"), Ok(0xfa2e));
        assert_eq!(parse_u16("1234"), Ok(1234));
        assert!(parse_u16("0x10000").is_err());
        assert!(parse_u16("vid").is_err());
    }

    #[test]
    fn test_parse_u8() {
        assert_eq!(parse_u8("0xC0"), Ok(0xC0));
        assert_eq!(parse_u8("9"), Ok(9));
        assert!(parse_u8("0x100").is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("0102ff"), Ok(vec![1, 2, 0xff]));
        assert_eq!(parse_hex_bytes("01 02:ff"), Ok(vec![1, 2, 0xff]));
        assert_eq!(parse_hex_bytes(""), Ok(vec![]));
        assert!(parse_hex_bytes("012").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x01, 0xab]), "01 ab");
        assert_eq!(hex_string(&[]), "");
    }
}
