use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wear_tracker::api::{ApiConfig, ApiHandle, ApiServer};
use wear_tracker::config::{StreamSettings, WindowSettings};
use wear_tracker::detect::ScriptedBackend;
use wear_tracker::{
    open_source, CatalogApi, ClothingCatalogEntry, DetectionThresholds, Detector,
    SessionSettings, Station, SystemClock, Vocabulary,
};

struct FakeBackend {
    laundry_up: bool,
    pushes: AtomicUsize,
}

impl CatalogApi for FakeBackend {
    fn fetch_catalog(&self) -> Result<Vec<ClothingCatalogEntry>> {
        Ok(Vec::new())
    }

    fn push_wear(&self, _name: &str, _wears_before_wash: u32) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn log_worn_items(&self, _date: NaiveDate, _items: &[String]) -> Result<()> {
        Ok(())
    }

    fn laundry_list(&self) -> Result<serde_json::Value> {
        if !self.laundry_up {
            return Err(anyhow!("connection refused"));
        }
        Ok(serde_json::json!([
            {"Name": "Blue Hoodie", "WearsBeforeWash": 3, "ConfiguredWears": 3}
        ]))
    }
}

struct TestServer {
    backend: Arc<FakeBackend>,
    api_handle: Option<ApiHandle>,
}

impl TestServer {
    fn new(labels: Vec<Vec<String>>, laundry_up: bool) -> Result<Self> {
        let backend = Arc::new(FakeBackend {
            laundry_up,
            pushes: AtomicUsize::new(0),
        });
        let settings = SessionSettings {
            vocabulary: Vocabulary::default(),
            window: WindowSettings {
                duration: Duration::from_millis(50),
                count_threshold: 0,
            },
        };
        let stream = StreamSettings {
            url: "stub://closet".to_string(),
            target_fps: 10,
            width: 32,
            height: 18,
            read_timeout: Duration::from_secs(1),
        };
        let detector = Detector::new(
            Box::new(ScriptedBackend::new(labels)),
            DetectionThresholds::default(),
        );
        let station = Station::new(
            settings,
            detector,
            backend.clone(),
            Box::new(move || open_source(&stream)),
            Arc::new(SystemClock),
        );
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let api_handle = ApiServer::new(api_config, Arc::new(station)).spawn()?;
        Ok(Self {
            backend,
            api_handle: Some(api_handle),
        })
    }

    fn request(&self, raw: &str) -> Result<(String, serde_json::Value)> {
        let addr = self
            .api_handle
            .as_ref()
            .map(|handle| handle.addr)
            .ok_or_else(|| anyhow!("server stopped"))?;
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        stream.write_all(raw.as_bytes())?;
        let (headers, body) = read_response(&mut stream)?;
        Ok((headers, serde_json::from_str(&body)?))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn hoodie() -> Vec<Vec<String>> {
    vec![vec!["Blue Hoodie".to_string()]]
}

#[test]
fn trigger_returns_detected_items() -> Result<()> {
    let server = TestServer::new(hoodie(), true)?;
    let (headers, body) = server.request(
        "POST /trigger-detection HTTP/1.1\r\nHost: localhost\r\nX-Device-Id: esp32-closet\r\nContent-Length: 0\r\n\r\n",
    )?;

    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(
        body,
        serde_json::json!({"status": "success", "detecteditems": ["Blue Hoodie"]})
    );
    assert_eq!(server.backend.pushes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn trigger_with_nothing_seen_is_still_success() -> Result<()> {
    let server = TestServer::new(Vec::new(), true)?;
    let (headers, body) = server.request(
        "POST /trigger-detection HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n{}",
    )?;

    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body["status"], "success");
    assert_eq!(body["detecteditems"], serde_json::json!([]));
    assert_eq!(server.backend.pushes.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn laundry_list_is_proxied_verbatim() -> Result<()> {
    let server = TestServer::new(hoodie(), true)?;
    let (headers, body) =
        server.request("GET /laundry-list HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body[0]["Name"], "Blue Hoodie");
    assert_eq!(body[0]["WearsBeforeWash"], 3);
    Ok(())
}

#[test]
fn laundry_list_backend_failure_is_bad_gateway() -> Result<()> {
    let server = TestServer::new(hoodie(), false)?;
    let (headers, body) =
        server.request("GET /laundry-list HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    assert!(headers.starts_with("HTTP/1.1 502"));
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .unwrap_or("")
        .contains("connection refused"));
    Ok(())
}

#[test]
fn rejects_unknown_routes_and_wrong_methods() -> Result<()> {
    let server = TestServer::new(hoodie(), true)?;

    let (headers, body) = server.request("GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body["status"], "ok");

    let (headers, _) = server.request("GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 404"));

    let (headers, _) =
        server.request("GET /trigger-detection HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(headers.starts_with("HTTP/1.1 405"));

    let (headers, _) = server.request(
        "POST /laundry-list HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
    )?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    assert_eq!(server.backend.pushes.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn rejects_oversized_requests() -> Result<()> {
    let server = TestServer::new(hoodie(), true)?;
    let (headers, body) = server.request(
        "POST /trigger-detection HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100000\r\n\r\n",
    )?;
    assert!(headers.starts_with("HTTP/1.1 413"));
    assert_eq!(body["error"], "request_too_large");
    assert_eq!(server.backend.pushes.load(Ordering::SeqCst), 0);
    Ok(())
}
