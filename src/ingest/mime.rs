use base64::Engine;
use log::warn;

/// One attachment lifted out of a camera message
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Pull every attachment part out of a raw RFC 822 message. Cameras send
/// simple multipart bodies; nested multiparts are walked, non-attachment
/// parts (alarm text) are skipped, and a part that fails to decode is
/// dropped without failing the message.
pub fn extract_attachments(raw: &[u8]) -> Vec<Attachment> {
    let mut out = Vec::new();
    walk_part(raw, 0, &mut out);
    out
}

const MAX_DEPTH: usize = 8;

fn walk_part(part: &[u8], depth: usize, out: &mut Vec<Attachment>) {
    if depth > MAX_DEPTH {
        warn!("Ignoring multipart nesting deeper than {}", MAX_DEPTH);
        return;
    }

    let (header_block, body) = split_header_block(part);
    let headers = parse_headers(header_block);

    let content_type = headers
        .get("content-type")
        .unwrap_or("text/plain")
        .to_string();
    let mime_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime_type.starts_with("multipart/") {
        let Some(boundary) = header_param(&content_type, "boundary") else {
            warn!("Multipart part without boundary, skipping");
            return;
        };
        for child in split_parts(body, &boundary) {
            walk_part(&child, depth + 1, out);
        }
        return;
    }

    // Leaf part: only parts carrying a filename are attachments.
    let disposition = headers.get("content-disposition").unwrap_or("");
    let filename = header_param(disposition, "filename")
        .or_else(|| header_param(&content_type, "name"));
    let Some(filename) = filename else {
        return;
    };

    let encoding = headers
        .get("content-transfer-encoding")
        .unwrap_or("7bit")
        .trim()
        .to_ascii_lowercase();

    let data = match decode_body(body, &encoding) {
        Some(data) => data,
        None => {
            warn!("Failed to decode {} body for {}, skipping part", encoding, filename);
            return;
        }
    };

    out.push(Attachment {
        filename,
        content_type: mime_type,
        data,
    });
}

/// Split a part into its header block and body at the first empty line
fn split_header_block(part: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(part, b"\r\n\r\n") {
        (&part[..pos], &part[pos + 4..])
    } else if let Some(pos) = find(part, b"\n\n") {
        (&part[..pos], &part[pos + 2..])
    } else {
        (part, &[])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a header block, unfolding continuation lines
fn parse_headers(block: &[u8]) -> Headers {
    let text = String::from_utf8_lossy(block);
    let mut entries: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = entries.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = line.split_once(':') {
            entries.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    Headers { entries }
}

/// Extract a `key=value` parameter from a structured header value,
/// stripping optional quotes
fn header_param(header_value: &str, param: &str) -> Option<String> {
    for piece in header_value.split(';').skip(1) {
        let Some((key, value)) = piece.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case(param) {
            let value = value.trim().trim_matches('"');
            if value.is_empty() {
                return None;
            }
            return Some(value.to_string());
        }
    }
    None
}

/// Split a multipart body into child parts by its boundary delimiter lines
fn split_parts(body: &[u8], boundary: &str) -> Vec<Vec<u8>> {
    let open = format!("--{}", boundary);
    let close = format!("--{}--", boundary);

    let mut parts = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    for line in lines_with_endings(body) {
        let trimmed = trim_line_ending(line);

        if trimmed == close.as_bytes() {
            if let Some(part) = current.take() {
                parts.push(part);
            }
            break;
        }
        if trimmed == open.as_bytes() {
            if let Some(part) = current.take() {
                parts.push(part);
            }
            current = Some(Vec::new());
            continue;
        }
        if let Some(part) = current.as_mut() {
            part.extend_from_slice(line);
        }
    }

    if let Some(part) = current.take() {
        parts.push(part);
    }

    parts
}

fn lines_with_endings(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + 1)
            .unwrap_or(rest.len());
        let (line, tail) = rest.split_at(end);
        rest = tail;
        Some(line)
    })
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut line = line;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}

fn decode_body(body: &[u8], encoding: &str) -> Option<Vec<u8>> {
    match encoding {
        "base64" => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            base64::engine::general_purpose::STANDARD.decode(compact).ok()
        }
        "quoted-printable" => Some(decode_quoted_printable(body)),
        // 7bit/8bit/binary: raw body minus the boundary's leading CRLF
        _ => {
            let mut data = body.to_vec();
            if data.ends_with(b"\n") {
                data.pop();
                if data.ends_with(b"\r") {
                    data.pop();
                }
            }
            Some(data)
        }
    }
}

fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        // Soft line break
        if input[i + 1..].starts_with(b"\r\n") {
            i += 3;
            continue;
        }
        if input[i + 1..].starts_with(b"\n") {
            i += 2;
            continue;
        }

        // =XX escape
        if i + 2 < input.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(hex) = std::str::from_utf8(hex) {
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
            }
        }

        out.push(b);
        i += 1;
    }

    out
}
