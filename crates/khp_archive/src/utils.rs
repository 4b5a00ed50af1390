/// Hash a file name the way the archive indexes it.
///
/// Names are case sensitive; the table stores lower-case names.
pub fn hash_name(name: &str) -> u32 {
    name.bytes().fold(0u32, |hash, c| {
        hash.wrapping_mul(2) ^ (((c as u32) << 16) % 69665)
    })
}

/// Parse a record hash given either as hex (`0x` prefix optional) or as a file name.
///
/// Eight hex digits are always read as a hash; anything else that is not `0x`
/// prefixed is treated as a name.
pub fn parse_hash(input: &str) -> u32 {
    let trimmed = input.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if let Ok(hash) = u32::from_str_radix(hex, 16) {
            return hash;
        }
    }
    if trimmed.len() == 8 {
        if let Ok(hash) = u32::from_str_radix(trimmed, 16) {
            return hash;
        }
    }
    hash_name(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_name() {
        assert_eq!(hash_name(""), 0);
        assert_eq!(hash_name("a"), 17477);
        assert_eq!(hash_name("ab"), 48302);
        assert_eq!(hash_name("kingdom.idx"), 0x0393_eba4);
        assert_eq!(hash_name("kingdom.img"), 0x0392_ebe4);
        assert_eq!(hash_name("system.cnf"), 0x009f_a157);
    }

    #[test]
    fn test_hash_name_is_case_sensitive() {
        assert_eq!(hash_name("KINGDOM.IDX"), 0x0376_b0f4);
    }

    #[test]
    fn test_parse_hash() {
        assert_eq!(parse_hash("0x0393eba4"), 0x0393_eba4);
        assert_eq!(parse_hash("0393EBA4"), 0x0393_eba4);
        assert_eq!(parse_hash("kingdom.idx"), 0x0393_eba4);
        assert_eq!(parse_hash(" a "), 17477);
    }
}
