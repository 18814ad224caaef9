// Helpers that keep key material and raw payloads out of logs.

/// Placeholder carrying only the length of a text body.
pub fn redact_body(s: &str) -> String {
    format!("<redacted len={}>", s.len())
}

/// Placeholder carrying only the length of a byte payload.
pub fn redact_hex_bytes(bytes: &[u8]) -> String {
    format!("<redacted hex len={}>", bytes.len())
}

/// Shortens an address or hash to `head…tail` for log lines.
pub fn short_id(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 12 {
        return s.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
