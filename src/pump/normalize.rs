use bytes::Bytes;

/// Collapse line breaks into single spaces and trim surrounding whitespace.
///
/// `\r\n` and a lone `\n` both become one space.
pub fn normalize(raw: Bytes) -> Bytes {
    let needs_rewrite = raw.contains(&b'\n');
    let trimmed_len = raw.len() - leading_ws(&raw) - trailing_ws(&raw);
    if !needs_rewrite {
        if trimmed_len == raw.len() {
            return raw;
        }
        let start = leading_ws(&raw);
        return raw.slice(start..start + trimmed_len);
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'\r' if raw.get(i + 1) == Some(&b'\n') => {
                out.push(b' ');
                i += 2;
            }
            b'\n' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    let start = leading_ws(&out);
    let end = out.len() - trailing_ws(&out);
    if start >= end {
        return Bytes::new();
    }
    Bytes::copy_from_slice(&out[start..end])
}

fn leading_ws(data: &[u8]) -> usize {
    data.iter().take_while(|b| b.is_ascii_whitespace()).count()
}

fn trailing_ws(data: &[u8]) -> usize {
    let trailing = data.iter().rev().take_while(|b| b.is_ascii_whitespace()).count();
    // all-whitespace input is counted once, by leading_ws
    if trailing == data.len() {
        0
    } else {
        trailing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(input: &str) -> String {
        String::from_utf8(normalize(Bytes::from(input.to_string())).to_vec()).unwrap()
    }

    #[test]
    fn clean_payload_is_untouched() {
        assert_eq!(norm("hello world"), "hello world");
    }

    #[test]
    fn line_breaks_become_spaces() {
        assert_eq!(norm("a\nb\r\nc"), "a b c");
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(norm("  {\"op\":1}\r\n"), "{\"op\":1}");
        assert_eq!(norm("\tping \n"), "ping");
    }

    #[test]
    fn blank_payload_becomes_empty() {
        assert_eq!(norm(" \r\n \n"), "");
        assert_eq!(norm("   "), "");
        assert_eq!(norm(""), "");
    }
}
