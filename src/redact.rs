use std::borrow::Cow;

const JSON_SECRET_FIELDS: [&str; 5] = [
    "\"accessToken\"",
    "\"refreshToken\"",
    "\"token\"",
    "\"password\"",
    "\"newPassword\"",
];

const JWT_PREFIX: &str = "eyJ";

fn redact_json_fields(input: &str) -> String {
    let mut redacted = input.to_string();

    for field in JSON_SECRET_FIELDS {
        if !redacted.contains(field) {
            continue;
        }
        let mut out = String::with_capacity(redacted.len());
        let mut rest = redacted.as_str();
        while let Some(idx) = rest.find(field) {
            out.push_str(&rest[..idx + field.len()]);
            rest = &rest[idx + field.len()..];

            // Keep `: "` as-is, then swallow the string value.
            let trimmed = rest.trim_start_matches([' ', ':']);
            let gap = rest.len() - trimmed.len();
            if gap == 0 || !trimmed.starts_with('"') {
                continue;
            }
            out.push_str(&rest[..gap + 1]);
            rest = &trimmed[1..];

            let mut consumed = 0;
            let mut escaped = false;
            for ch in rest.chars() {
                if ch == '"' && !escaped {
                    break;
                }
                escaped = ch == '\\' && !escaped;
                consumed += ch.len_utf8();
            }
            out.push_str("REDACTED");
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        redacted = out;
    }

    redacted
}

fn redact_jwts(input: String) -> String {
    if !input.contains(JWT_PREFIX) {
        return input;
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input.as_str();
    while let Some(idx) = rest.find(JWT_PREFIX) {
        out.push_str(&rest[..idx]);
        out.push_str("eyJ-REDACTED");
        rest = &rest[idx + JWT_PREFIX.len()..];
        let mut consumed = 0;
        for ch in rest.chars() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                consumed += ch.len_utf8();
            } else {
                break;
            }
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

/// Scrubs token-bearing JSON fields and anything shaped like a JWT.
pub fn redact_tokens(input: &str) -> Cow<'_, str> {
    let redacted = redact_jwts(redact_json_fields(input));
    if redacted == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(redacted)
    }
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }

    (0..=hay.len() - nee.len()).find(|&i| hay[i..i + nee.len()].eq_ignore_ascii_case(nee))
}

fn redact_header_value(text: String, header: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, header) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..idx + header.len()]);
        rest = &rest[idx + header.len()..];

        if let Some(stripped) = rest.strip_prefix(' ') {
            out.push(' ');
            rest = stripped;
        }

        let consumed = rest.find(['\n', '\r']).unwrap_or(rest.len());
        out.push_str(replacement);
        rest = &rest[consumed..];
    }
    out
}

/// Everything `redact_tokens` covers plus `Authorization: Bearer` header lines.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let value = redact_tokens(input).into_owned();
    let value = redact_header_value(value, "Authorization: Bearer", "REDACTED");

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_tokens_scrubs_json_fields() {
        let input = r#"{"accessToken":"abc","refreshToken": "R1","other":"ok"}"#;
        let out = redact_tokens(input).to_string();
        assert_eq!(
            out,
            r#"{"accessToken":"REDACTED","refreshToken": "REDACTED","other":"ok"}"#
        );
    }

    #[test]
    fn redact_tokens_scrubs_jwt_shapes() {
        let input = "token eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjF9.c2ln rejected";
        let out = redact_tokens(input).to_string();
        assert_eq!(out, "token eyJ-REDACTED rejected");
    }

    #[test]
    fn redact_tokens_borrows_when_clean() {
        assert!(matches!(redact_tokens("nothing here"), Cow::Borrowed(_)));
    }

    #[test]
    fn redact_secrets_redacts_bearer_header_line() {
        let input = "authorization: Bearer opaque-value\nAccept: json\n";
        let out = redact_secrets(input).to_string();
        assert_eq!(out, "authorization: Bearer REDACTED\nAccept: json\n");
    }
}
