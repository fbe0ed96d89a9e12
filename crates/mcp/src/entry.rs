#![forbid(unsafe_code)]

//! Stdio transport. Framing is auto-detected from the first non-empty
//! line and then pinned for the life of the process: a line starting
//! with JSON is newline-delimited mode, a header line is Content-Length
//! mode.

use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};

use crate::server::McpServer;
use crate::support::{JsonRpcRequest, json_rpc_error};

const MAX_CONTENT_LENGTH_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransportMode {
    NewlineJson,
    ContentLength,
}

fn detect_mode_from_first_line(line: &str) -> Option<TransportMode> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(TransportMode::NewlineJson);
    }
    // Some clients send Content-Type before Content-Length; any header
    // line pins header mode.
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("content-length:") || lower.starts_with("content-type:") {
        return Some(TransportMode::ContentLength);
    }
    None
}

fn parse_content_length_header(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let (key, value) = trimmed.split_once(':')?;
    if !key.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse::<usize>().ok()
}

fn read_content_length_frame<R: BufRead>(
    reader: &mut R,
    mut header: String,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut content_length: Option<usize> = parse_content_length_header(&header);

    loop {
        if header.trim_end().is_empty() {
            break;
        }
        header.clear();
        let read = reader.read_line(&mut header)?;
        if read == 0 {
            // EOF mid-header: connection closed.
            return Ok(None);
        }
        if content_length.is_none() {
            content_length = parse_content_length_header(&header);
        }
    }

    let Some(len) = content_length else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        ));
    };
    if len > MAX_CONTENT_LENGTH_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Content-Length exceeds max allowed size",
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

fn write_newline_json<W: Write>(
    writer: &mut W,
    reply: &Value,
) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(writer, "{}", serde_json::to_string(reply)?)?;
    writer.flush()?;
    Ok(())
}

fn write_content_length_json<W: Write>(
    writer: &mut W,
    reply: &Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = serde_json::to_vec(reply)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, Value> {
    let data: Value = serde_json::from_slice(body)
        .map_err(|err| json_rpc_error(None, -32700, &format!("Parse error: {err}")))?;
    let (id, has_method) = match data.as_object() {
        Some(fields) => (fields.get("id").cloned(), fields.contains_key("method")),
        None => return Err(json_rpc_error(None, -32600, "Invalid Request")),
    };
    if !has_method {
        return Err(json_rpc_error(id, -32600, "Invalid Request"));
    }
    serde_json::from_value::<JsonRpcRequest>(data)
        .map_err(|err| json_rpc_error(id, -32600, &format!("Invalid Request: {err}")))
}

fn respond(server: &mut McpServer, body: &[u8]) -> Option<Value> {
    match parse_request(body) {
        Ok(request) => server.handle(request),
        Err(error_reply) => Some(error_reply),
    }
}

pub(crate) fn run_stdio(server: &mut McpServer) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = std::io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let mut stdout = std::io::stdout().lock();
    let mut mode: Option<TransportMode> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let current = match mode {
            Some(current) => current,
            None => match detect_mode_from_first_line(&line) {
                Some(detected) => {
                    mode = Some(detected);
                    detected
                }
                None => continue,
            },
        };
        match current {
            TransportMode::NewlineJson => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                if let Some(reply) = respond(server, raw.as_bytes()) {
                    write_newline_json(&mut stdout, &reply)?;
                }
            }
            TransportMode::ContentLength => {
                if line.trim().is_empty() {
                    continue;
                }
                let Some(body) = read_content_length_frame(&mut reader, line)? else {
                    break;
                };
                if let Some(reply) = respond(server, &body) {
                    write_content_length_json(&mut stdout, &reply)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn first_line_pins_the_framing() {
        assert_eq!(
            detect_mode_from_first_line(r#"{"jsonrpc":"2.0"}"#),
            Some(TransportMode::NewlineJson)
        );
        assert_eq!(
            detect_mode_from_first_line("Content-Length: 12\r\n"),
            Some(TransportMode::ContentLength)
        );
        assert_eq!(
            detect_mode_from_first_line("content-type: application/json\r\n"),
            Some(TransportMode::ContentLength)
        );
        assert_eq!(detect_mode_from_first_line("   \n"), None);
    }

    #[test]
    fn content_length_frame_reads_exactly_the_body() {
        let mut reader = Cursor::new(b"\r\n{\"method\":\"ping\"}".to_vec());
        let body = read_content_length_frame(&mut reader, "Content-Length: 17\r\n".to_string())
            .expect("frame")
            .expect("body");
        assert_eq!(body, b"{\"method\":\"ping\"}");
    }

    #[test]
    fn missing_length_header_is_invalid_data() {
        let mut reader = Cursor::new(b"\r\nrest".to_vec());
        let err = read_content_length_frame(&mut reader, "X-Other: 1\r\n".to_string())
            .expect_err("no length");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_frames_are_refused() {
        let header = format!("Content-Length: {}\r\n", MAX_CONTENT_LENGTH_BYTES + 1);
        let mut reader = Cursor::new(b"\r\n".to_vec());
        let err = read_content_length_frame(&mut reader, header).expect_err("too large");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn malformed_bodies_map_to_rpc_error_codes() {
        let parse = parse_request(b"not json").expect_err("parse error");
        assert_eq!(parse["error"]["code"], -32700);

        let invalid = parse_request(b"[1,2]").expect_err("not an object");
        assert_eq!(invalid["error"]["code"], -32600);

        let no_method = parse_request(br#"{"id":4}"#).expect_err("no method");
        assert_eq!(no_method["error"]["code"], -32600);
        assert_eq!(no_method["id"], 4);

        let ok = parse_request(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).expect("valid");
        assert_eq!(ok.method, "ping");
    }
}
