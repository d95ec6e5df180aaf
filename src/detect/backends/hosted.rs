use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult, DetectionThresholds};
use crate::frame::{Frame, UPLOAD_JPEG_QUALITY};

/// Configuration for a hosted inference endpoint.
#[derive(Clone, Debug)]
pub struct HostedConfig {
    /// Inference API root, e.g. `https://detect.roboflow.com`.
    pub api_url: String,
    /// `<project>/<version>` of the trained model.
    pub model_id: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Backend that posts each frame to a hosted object-detection API.
///
/// The frame is JPEG-encoded and sent base64 in the request body; the API applies
/// the confidence and overlap thresholds server side and answers with a list of
/// predictions. This is the only backend that sends frames off the device.
pub struct HostedBackend {
    config: HostedConfig,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct HostedResponse {
    #[serde(default)]
    predictions: Vec<HostedPrediction>,
}

#[derive(Debug, Deserialize)]
struct HostedPrediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    #[serde(rename = "class")]
    class_name: String,
}

impl HostedBackend {
    pub fn new(config: HostedConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.model_id.trim_matches('/')
        )
    }
}

impl DetectorBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        thresholds: &DetectionThresholds,
    ) -> Result<DetectionResult> {
        let jpeg = frame.encode_jpeg(UPLOAD_JPEG_QUALITY)?;
        let body = STANDARD.encode(jpeg);
        let response = self
            .agent
            .post(&self.endpoint())
            .query("api_key", &self.config.api_key)
            .query("confidence", &thresholds.confidence_percent().to_string())
            .query("overlap", &thresholds.overlap_percent().to_string())
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body)
            .map_err(|err| inference_error(&self.config.model_id, err))?;
        let parsed: HostedResponse = response
            .into_json()
            .context("hosted inference returned invalid json")?;
        Ok(parse_predictions(parsed))
    }
}

/// The request URL carries the API key, so the error never includes it.
fn inference_error(model_id: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, _) => {
            anyhow!("hosted inference for {} failed: status {}", model_id, code)
        }
        ureq::Error::Transport(transport) => anyhow!(
            "hosted inference for {} failed: {}: {}",
            model_id,
            transport.kind(),
            transport.message().unwrap_or("no detail")
        ),
    }
}

fn parse_predictions(response: HostedResponse) -> DetectionResult {
    DetectionResult::new(
        response
            .predictions
            .into_iter()
            .map(|prediction| Detection {
                class_name: prediction.class_name,
                confidence: prediction.confidence,
                x: prediction.x,
                y: prediction.y,
                width: prediction.width,
                height: prediction.height,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn backend_at(api_url: String, api_key: &str) -> HostedBackend {
        HostedBackend::new(HostedConfig {
            api_url,
            model_id: "clothing-detection-uhmgf/9".to_string(),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn parses_prediction_payload() {
        let raw = r#"{
            "time": 0.12,
            "image": {"width": 640, "height": 360},
            "predictions": [
                {"x": 320.5, "y": 180.0, "width": 200, "height": 150,
                 "confidence": 0.91, "class": "Waterloo Hoodie", "class_id": 7},
                {"x": 300.0, "y": 300.0, "width": 120, "height": 90,
                 "confidence": 0.84, "class": "Navy Sweatpants", "class_id": 3}
            ]
        }"#;
        let response: HostedResponse = serde_json::from_str(raw).unwrap();
        let result = parse_predictions(response);
        assert_eq!(result.labels(), vec!["Waterloo Hoodie", "Navy Sweatpants"]);
        assert_eq!(result.detections[0].x, 320.5);
        assert_eq!(result.detections[1].height, 90.0);
    }

    #[test]
    fn missing_predictions_means_nothing_detected() {
        let response: HostedResponse = serde_json::from_str("{}").unwrap();
        assert!(parse_predictions(response).is_empty());
    }

    #[test]
    fn endpoint_joins_api_root_and_model() {
        let backend = backend_at("https://detect.roboflow.com/".to_string(), "key");
        assert_eq!(
            backend.endpoint(),
            "https://detect.roboflow.com/clothing-detection-uhmgf/9"
        );
    }

    fn drain_request(stream: &mut std::net::TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while data.len() < header_end + content_length {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn rejected_key_is_not_echoed_in_the_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            drain_request(&mut stream);
            let body = r#"{"message":"unauthorized"}"#;
            let response = format!(
                "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        });

        let mut backend = backend_at(format!("http://{}", addr), "rf-secret-key-123");
        let frame = Frame::new(vec![128u8; 16 * 16 * 3], 16, 16, 1);
        let err = backend
            .detect(&frame, &DetectionThresholds::default())
            .unwrap_err();
        server.join().unwrap();

        let message = format!("{:#}", err);
        assert!(message.contains("401"), "{}", message);
        assert!(!message.contains("rf-secret-key-123"), "{}", message);
        assert!(!message.contains("api_key"), "{}", message);
    }

    #[test]
    fn unreachable_api_error_omits_the_key() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut backend = backend_at(format!("http://{}", addr), "rf-secret-key-123");
        let frame = Frame::new(vec![128u8; 16 * 16 * 3], 16, 16, 1);
        let err = backend
            .detect(&frame, &DetectionThresholds::default())
            .unwrap_err();
        assert!(!format!("{:#}", err).contains("rf-secret-key-123"));
    }
}
