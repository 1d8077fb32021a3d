//! Numeric helpers for EMV data elements

/// Luhn (mod 10) check over a string of decimal digits
///
/// Returns `false` for empty input or any non-digit character.
pub fn luhn_check(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    sum % 10 == 0
}

/// Decode BCD / compressed numeric bytes to a digit string
///
/// Trailing hex 'F' nibbles (right padding) are stripped.
pub fn bcd_to_digits(bytes: &[u8]) -> String {
    let hex = hex::encode_upper(bytes);
    strip_f_padding(&hex).to_string()
}

/// Strip right padding of hex 'F' nibbles
pub fn strip_f_padding(hex: &str) -> &str {
    hex.trim_end_matches(['F', 'f'])
}

/// Big-endian unsigned integer of up to eight bytes
pub fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Encode a digit string as BCD, right-padding an odd count with 'F'
pub fn digits_to_bcd(digits: &str) -> Option<Vec<u8>> {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut padded = digits.to_string();
    if padded.len() % 2 == 1 {
        padded.push('F');
    }
    hex::decode(padded).ok()
}
