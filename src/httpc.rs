//! Minimal HTTP client for the compression RPC endpoint.
//!
//! We intentionally avoid TLS + heavyweight deps here:
//! - the photon endpoint is expected to be on the same host/VPC
//! - we only need POST + JSON responses
//!
//! Read/write timeouts map to `ChainTimeout` so callers can apply the
//! bounded-retry policy.

use crate::error::AppError;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

pub fn parse_http_base(base: &str) -> Result<(String, u16, String), AppError> {
    // - http://127.0.0.1:8784
    // - http://localhost:8784/prefix
    //
    // NOTE: intentionally no TLS here (no https).
    let rest = base
        .trim()
        .trim_end_matches('/')
        .strip_prefix("http://")
        .ok_or_else(|| AppError::BadRequest("compression URL must start with http://".into()))?;

    let (host_port, prefix) = match rest.split_once('/') {
        Some((hp, p)) => (hp, format!("/{}", p.trim_end_matches('/'))),
        None => (rest, "".to_string()),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| AppError::BadRequest("compression URL port is invalid".into()))?;
            (h.to_string(), port)
        }
        None => (host_port.to_string(), 80),
    };

    Ok((host, port, prefix))
}

fn io_err(op: &str, e: std::io::Error) -> AppError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            AppError::ChainTimeout(format!("compression rpc {op} timed out: {e}"))
        }
        _ => AppError::BadGateway(format!("compression rpc {op} failed: {e}")),
    }
}

fn http_dechunk(body: &[u8]) -> Result<Vec<u8>, AppError> {
    // `Transfer-Encoding: chunked` is fairly common even for small JSON
    // responses; a tiny decoder is sufficient here.
    let mut out = Vec::new();
    let mut i = 0usize;
    loop {
        let mut line_end = None;
        for j in i..body.len().saturating_sub(1) {
            if body[j] == b'\r' && body[j + 1] == b'\n' {
                line_end = Some(j);
                break;
            }
        }
        let Some(le) = line_end else { break };
        let line = &body[i..le];
        let size_hex = std::str::from_utf8(line)
            .map_err(|_| AppError::BadGateway("invalid chunk header".into()))?;
        let size = usize::from_str_radix(size_hex.split(';').next().unwrap_or("").trim(), 16)
            .map_err(|_| AppError::BadGateway("invalid chunk size".into()))?;
        i = le + 2;
        if size == 0 {
            break;
        }
        if i + size > body.len() {
            return Err(AppError::BadGateway("chunked body truncated".into()));
        }
        out.extend_from_slice(&body[i..i + size]);
        i += size + 2; // skip data + \r\n
    }
    Ok(out)
}

pub fn http_post_json(
    host: &str,
    port: u16,
    path: &str,
    json_body: &[u8],
    timeout: Duration,
) -> Result<(u16, Vec<u8>), AppError> {
    // NOTE: deliberately small: no keep-alives, no redirects, no
    // compression, "Connection: close".
    let mut stream = TcpStream::connect((host, port)).map_err(|e| io_err("connect", e))?;
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(timeout));

    stream
        .write_all(
            format!(
                "POST {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nAccept: application/json\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                path,
                host,
                json_body.len()
            )
            .as_bytes(),
        )
        .map_err(|e| io_err("write", e))?;
    stream.write_all(json_body).map_err(|e| io_err("write", e))?;

    let mut resp = Vec::new();
    stream
        .read_to_end(&mut resp)
        .map_err(|e| io_err("read", e))?;

    let needle = b"\r\n\r\n";
    let header_end = resp
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + needle.len())
        .ok_or_else(|| AppError::BadGateway("invalid HTTP response".into()))?;
    let header = &resp[..header_end];
    let body_raw = &resp[header_end..];

    let header_str = std::str::from_utf8(header)
        .map_err(|_| AppError::BadGateway("invalid HTTP header".into()))?;
    let status = header_str
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| AppError::BadGateway("invalid HTTP status".into()))?;

    let body = if header_str
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked")
    {
        http_dechunk(body_raw)?
    } else {
        body_raw.to_vec()
    };

    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_parse_variants() {
        assert_eq!(
            parse_http_base("http://127.0.0.1:8784").unwrap(),
            ("127.0.0.1".to_string(), 8784, "".to_string())
        );
        assert_eq!(
            parse_http_base("http://localhost:8784/api/").unwrap(),
            ("localhost".to_string(), 8784, "/api".to_string())
        );
        assert_eq!(
            parse_http_base("http://indexer").unwrap(),
            ("indexer".to_string(), 80, "".to_string())
        );
        assert!(parse_http_base("https://secure").is_err());
    }

    #[test]
    fn dechunk_small_body() {
        let body = b"5\r\nhello\r\n0\r\n\r\n";
        assert_eq!(http_dechunk(body).unwrap(), b"hello");
    }
}
