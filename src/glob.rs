// shell-style name patterns: `*`, `?`, `[abc]`, `[!abc]`, `\x`
use regex::Regex;

pub fn glob(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => re.push_str(r"\\"),
            },
            '[' => {
                let mut raw = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == ']' {
                        closed = true;
                        break;
                    }
                    raw.push(ch);
                }
                if !closed {
                    re.push_str(&regex::escape(&format!("[{raw}")));
                    continue;
                }
                let body = match raw.strip_prefix('!') {
                    Some(body) => {
                        re.push_str("[^");
                        body
                    }
                    None => {
                        re.push('[');
                        raw.as_str()
                    }
                };
                for ch in body.chars() {
                    if ch != '-' && ch.is_ascii_punctuation() {
                        re.push('\\');
                    }
                    re.push(ch);
                }
                re.push(']');
            }
            ch => re.push_str(&regex::escape(&ch.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}
