//! Trigger server.
//!
//! A deliberately small HTTP/1.1 server over `std::net`: one connection at a
//! time, one request per connection. The station's camera board calls
//! `POST /trigger-detection` and waits for the session to finish.
//!
//! Routes:
//! - `POST /trigger-detection`: run one session, answer with the confirmed garments
//! - `GET /laundry-list`: the backend's laundry list, verbatim
//! - `GET /health`: liveness

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::station::Station;

const MAX_REQUEST_BYTES: usize = 8192;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting and wait for the server thread. A session in progress
    /// finishes first.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("trigger server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    station: Arc<Station>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, station: Arc<Station>) -> Self {
        Self { cfg, station }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid server address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("trigger server listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let station = self.station;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &station, shutdown_thread) {
                log::error!("trigger server stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, station: &Station, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, station) {
                    log::warn!("trigger server request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, station: &Station) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_json_response(&mut stream, 413, &json!({"error": "request_too_large"}))?;
            return Err(anyhow!("request too large"));
        }
        Err(RequestError::Malformed(err)) => {
            write_json_response(&mut stream, 400, &json!({"error": "bad_request"}))?;
            return Err(err);
        }
    };

    let allowed = match request.path.as_str() {
        "/trigger-detection" => "POST",
        "/laundry-list" | "/health" => "GET",
        _ => {
            write_json_response(&mut stream, 404, &json!({"error": "not_found"}))?;
            return Ok(());
        }
    };
    if request.method != allowed {
        write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))?;
        return Ok(());
    }

    match request.path.as_str() {
        "/trigger-detection" => {
            log::info!(
                "detection triggered by {}",
                request.device_id().unwrap_or("unknown device")
            );
            let outcome = station.trigger(None);
            let body = json!({
                "status": "success",
                "detecteditems": outcome.confirmed_items(),
            });
            write_json_response(&mut stream, 200, &body)
        }
        "/laundry-list" => match station.laundry_list() {
            Ok(list) => write_json_response(&mut stream, 200, &list),
            Err(err) => {
                log::error!("laundry list unavailable: {:#}", err);
                let body = json!({"status": "error", "message": format!("{:#}", err)});
                write_json_response(&mut stream, 502, &body)
            }
        },
        _ => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
    }
}

enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Malformed(err.into())
    }
}

fn read_request(stream: &mut TcpStream) -> std::result::Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_REQUEST_BYTES {
            return Err(RequestError::TooLarge);
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let malformed = |msg: &str| RequestError::Malformed(anyhow!("{}", msg));
    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| malformed("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| malformed("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| malformed("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    // Drain the body so the client never sees a reset; its content is unused.
    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body_read = data.len().saturating_sub(header_end);
    while body_read < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn write_json_response(
    stream: &mut TcpStream,
    status: u16,
    body: &serde_json::Value,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        502 => "HTTP/1.1 502 Bad Gateway",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    fn device_id(&self) -> Option<&str> {
        self.headers
            .get("x-device-id")
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}
