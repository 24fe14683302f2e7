//! Escaped byte-sequence expansion.
//!
//! Magic and mask strings may spell bytes as `\xNN`. The kernel performs the
//! same expansion when a format is registered, so userspace matching has to
//! see the bytes the kernel sees.

/// Expand every `\xNN` sequence (two hex digits) into the byte it names.
///
/// Anything else, including a truncated or malformed escape, is copied
/// through unchanged. The output is never longer than the input.
pub fn expand_hex(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if input[i] == b'\\' && i + 3 < input.len() && input[i + 1] == b'x' {
            if let (Some(hi), Some(lo)) = (hex_value(input[i + 2]), hex_value(input[i + 3])) {
                out.push((hi << 4) | lo);
                i += 4;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }

    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
