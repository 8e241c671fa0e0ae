//! RTSP/1.0 message framing: request serialization and incremental response
//! parsing (spec.md §4.3). An RTSP response is headers terminated by a
//! blank line followed by an optional fixed-length (or SDP-delimited) body.

use std::collections::HashMap;

/// Outcome of a single liveness probe (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Live,
    NotFound,
    Invalid,
    Timeout,
    Error,
}

pub fn build_describe_request(url: &str, cseq: u64) -> Vec<u8> {
    format!("DESCRIBE {url} RTSP/1.0\r\nCSeq: {cseq}\r\n\r\n").into_bytes()
}

pub fn build_options_request(url: &str, cseq: u64) -> Vec<u8> {
    format!("OPTIONS {url} RTSP/1.0\r\nCSeq: {cseq}\r\n\r\n").into_bytes()
}

/// A single parsed RTSP response: its CSeq (if any) and status classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub cseq: Option<u64>,
    pub outcome: ProbeOutcome,
}

fn classify_status_line(line: &str) -> ProbeOutcome {
    // "RTSP/1.0 200 OK" (also tolerate "RTSP/2.0" per some servers).
    let mut parts = line.trim_end().splitn(3, ' ');
    let proto = parts.next().unwrap_or("");
    let code = parts.next().unwrap_or("");
    if !proto.starts_with("RTSP/") {
        return ProbeOutcome::Invalid;
    }
    match code.parse::<u32>() {
        Ok(n) if (200..300).contains(&n) => ProbeOutcome::Live,
        Ok(404) => ProbeOutcome::NotFound,
        Ok(_) => ProbeOutcome::Error,
        Err(_) => ProbeOutcome::Invalid,
    }
}

fn parse_headers(block: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let mut lines = block.split("\r\n");
    lines.next(); // skip start line
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    headers
}

/// Attempt to parse one complete RTSP response out of the front of `buf`.
/// Returns `Some((response, bytes_consumed))` when a full message is
/// available, `None` when more bytes are needed.
///
/// Per spec.md §4.3: when `Content-Length` is present and non-zero, that
/// many body bytes are required. When absent, and the bytes immediately
/// after headers begin with `v=`, the entire currently-buffered remainder is
/// heuristically treated as an SDP body (so this consumes everything
/// available rather than waiting for more).
pub fn try_parse_response(buf: &[u8]) -> Option<(ParsedResponse, usize)> {
    let header_end = find_subslice(buf, b"\r\n\r\n")?;
    let header_block = std::str::from_utf8(&buf[..header_end]).ok()?;
    let start_line = header_block.split("\r\n").next().unwrap_or("");
    let outcome = classify_status_line(start_line);
    let headers = parse_headers(header_block);
    let cseq = headers.get("cseq").and_then(|v| v.parse::<u64>().ok());

    let body_start = header_end + 4;
    let remaining = &buf[body_start..];

    if let Some(len) = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len == 0 {
            return Some((ParsedResponse { cseq, outcome }, body_start));
        }
        if remaining.len() < len {
            return None;
        }
        return Some((ParsedResponse { cseq, outcome }, body_start + len));
    }

    if remaining.starts_with(b"v=") {
        return Some((ParsedResponse { cseq, outcome }, buf.len()));
    }

    Some((ParsedResponse { cseq, outcome }, body_start))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_2xx_as_live() {
        let resp = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 0\r\n\r\n";
        let (parsed, consumed) = try_parse_response(resp).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::Live);
        assert_eq!(parsed.cseq, Some(1));
        assert_eq!(consumed, resp.len());
    }

    #[test]
    fn classifies_404_as_not_found() {
        let resp = b"RTSP/1.0 404 Not Found\r\nCSeq: 7\r\n\r\n";
        let (parsed, _) = try_parse_response(resp).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::NotFound);
    }

    #[test]
    fn classifies_other_status_as_error() {
        let resp = b"RTSP/1.0 500 Internal Server Error\r\nCSeq: 2\r\n\r\n";
        let (parsed, _) = try_parse_response(resp).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::Error);
    }

    #[test]
    fn non_rtsp_start_line_is_invalid() {
        let resp = b"HTTP/1.1 200 OK\r\nCSeq: 2\r\n\r\n";
        let (parsed, _) = try_parse_response(resp).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::Invalid);
    }

    #[test]
    fn non_numeric_status_is_invalid() {
        let resp = b"RTSP/1.0 OK FINE\r\nCSeq: 2\r\n\r\n";
        let (parsed, _) = try_parse_response(resp).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::Invalid);
    }

    #[test]
    fn waits_for_full_content_length_body() {
        let partial = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(try_parse_response(partial).is_none());
        let full = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 10\r\n\r\nabcdefghij";
        let (parsed, consumed) = try_parse_response(full).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::Live);
        assert_eq!(consumed, full.len());
    }

    #[test]
    fn sdp_heuristic_consumes_remainder_without_content_length() {
        let resp = b"RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\nv=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n";
        let (parsed, consumed) = try_parse_response(resp).unwrap();
        assert_eq!(parsed.outcome, ProbeOutcome::Live);
        assert_eq!(consumed, resp.len());
    }

    #[test]
    fn no_body_and_no_sdp_marker_consumes_only_headers() {
        let resp = b"RTSP/1.0 200 OK\r\nCSeq: 3\r\n\r\n";
        let (_, consumed) = try_parse_response(resp).unwrap();
        assert_eq!(consumed, resp.len());
    }
}
