//! Minimal `multipart/form-data` decoding for the upload endpoint.

use memchr::memmem;

use crate::error::{CatalogError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormPart {
    pub(crate) name: String,
    pub(crate) filename: Option<String>,
    pub(crate) data: Vec<u8>,
}

/// Boundary parameter of a `multipart/form-data` content type, if it is one.
pub(crate) fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = split_params(content_type).into_iter();
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

pub(crate) fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let malformed = |what: &str| CatalogError::Validation(format!("malformed multipart body: {what}"));

    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");
    let first = memmem::find(body, delimiter.as_bytes()).ok_or_else(|| malformed("no boundary"))?;
    let mut cursor = first + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            break;
        }
        if !rest.starts_with(b"\r\n") {
            return Err(malformed("expected line break after boundary"));
        }
        cursor += 2;

        let (headers, content_start) = if body[cursor..].starts_with(b"\r\n") {
            ("", cursor + 2)
        } else {
            let end = memmem::find(&body[cursor..], b"\r\n\r\n")
                .ok_or_else(|| malformed("unterminated part headers"))?;
            let headers = std::str::from_utf8(&body[cursor..cursor + end])
                .map_err(|_| malformed("part headers are not UTF-8"))?;
            (headers, cursor + end + 4)
        };

        let len = memmem::find(&body[content_start..], next_delimiter.as_bytes())
            .ok_or_else(|| malformed("missing closing boundary"))?;

        if let Some((name, filename)) = parse_disposition(headers) {
            parts.push(FormPart {
                name,
                filename,
                data: body[content_start..content_start + len].to_vec(),
            });
        }
        cursor = content_start + len + next_delimiter.len();
    }
    Ok(parts)
}

fn parse_disposition(headers: &str) -> Option<(String, Option<String>)> {
    let value = headers.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(value)
    })?;

    let mut name = None;
    let mut filename = None;
    for param in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(raw)
            .to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(unquoted),
            "filename" => filename = Some(unquoted),
            _ => {}
        }
    }
    Some((name?, filename))
}

/// Split on `;` outside double quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                out.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&value[start..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"preamble\r\n--XyZ\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"note\"\r\n\r\n");
        body.extend_from_slice(b"just text");
        body.extend_from_slice(b"\r\n--XyZ\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"a;b.pdf\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
        body.extend_from_slice(b"%PDF\r\nbinary\r\n--not-the-boundary\x00\xff");
        body.extend_from_slice(b"\r\n--XyZ--\r\n");
        body
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=XyZ").as_deref(),
            Some("XyZ")
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; boundary=\"a b\"")
                .as_deref(),
            Some("a b")
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
    }

    #[test]
    fn test_parse_fields_and_files() {
        let parts = parse_multipart(&sample_body(), "XyZ").unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name, "note");
        assert_eq!(parts[0].filename, None);
        assert_eq!(parts[0].data, b"just text");

        assert_eq!(parts[1].name, "file");
        assert_eq!(parts[1].filename.as_deref(), Some("a;b.pdf"));
        assert_eq!(parts[1].data, b"%PDF\r\nbinary\r\n--not-the-boundary\x00\xff");
    }

    #[test]
    fn test_empty_file_part() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"\"\r\n\r\n\r\n--B--\r\n";
        let parts = parse_multipart(body, "B").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename.as_deref(), Some(""));
        assert!(parts[0].data.is_empty());
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nno end";
        assert!(matches!(
            parse_multipart(body, "B"),
            Err(CatalogError::Validation(_))
        ));
        assert!(parse_multipart(b"nothing here", "B").is_err());
    }
}
