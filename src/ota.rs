//! Firmware version checks.
//!
//! One round trip to the version endpoint yields an [`OtaCheckResult`]:
//! mandatory firmware block, optional activation code, optional broker
//! config (merged into settings), optional server time (applied through the
//! clock seam). Version comparison is strict — a malformed segment is a
//! hard error, never coerced.

use crate::board::DeviceClock;
use crate::error::{Result, VoicelinkError};
use crate::settings::Settings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

/// Minimal blocking HTTP seam; one instance per check, produced by the
/// board factory.
pub trait HttpClient: Send {
    /// Performs one request and returns the response body on 2xx.
    fn request(
        &mut self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String>;
}

/// reqwest-backed client used on hosted boards.
pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn request(
        &mut self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String> {
        let mut request = match method {
            "POST" => self.client.post(url),
            _ => self.client.get(url),
        };
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        let response = request.send().map_err(|e| VoicelinkError::Transport {
            message: format!("request failed: {e}"),
        })?;
        if !response.status().is_success() {
            return Err(VoicelinkError::OtaCheck {
                message: format!("status {}", response.status()),
            });
        }
        response.text().map_err(|e| VoicelinkError::Transport {
            message: format!("read body: {e}"),
        })
    }
}

/// Scripted client for tests: responses are popped in order.
pub struct MockHttpClient {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<(String, String, Option<String>)>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: Result<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<(String, String, Option<String>)> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Shared-state request handling, so one scripted client can back many
    /// [`HttpClient`] instances (e.g. a board factory in tests).
    pub fn handle_request(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
    ) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((method.to_string(), url.to_string(), body.map(str::to_string)));
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(VoicelinkError::Transport {
                    message: "no scripted response".to_string(),
                })
            })
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for MockHttpClient {
    fn request(
        &mut self,
        method: &str,
        url: &str,
        _headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String> {
        self.handle_request(method, url, body)
    }
}

/// [`HttpClient`] view over a shared [`MockHttpClient`].
pub struct SharedMockHttp(pub std::sync::Arc<MockHttpClient>);

impl HttpClient for SharedMockHttp {
    fn request(
        &mut self,
        method: &str,
        url: &str,
        _headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String> {
        self.0.handle_request(method, url, body)
    }
}

// ---------------------------------------------------------------------------
// Check result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ActivationInfo {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerTime {
    pub timestamp_ms: i64,
    pub timezone_offset_minutes: i64,
}

impl ServerTime {
    /// Wall-clock milliseconds with the timezone offset applied.
    pub fn local_unix_millis(&self) -> i64 {
        self.timestamp_ms + self.timezone_offset_minutes * 60 * 1000
    }
}

/// Outcome of one version-check round trip. Transient: consumed immediately
/// for side effects, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OtaCheckResult {
    pub current_version: String,
    pub firmware_version: String,
    pub firmware_url: String,
    pub activation: Option<ActivationInfo>,
    pub mqtt_config: Option<BTreeMap<String, String>>,
    pub server_time: Option<ServerTime>,
}

impl OtaCheckResult {
    /// Whether the advertised firmware is newer than what is running.
    pub fn has_new_version(&self) -> Result<bool> {
        is_newer(&self.current_version, &self.firmware_version)
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    activation: Option<RawActivation>,
    #[serde(default)]
    mqtt: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    server_time: Option<RawServerTime>,
    #[serde(default)]
    firmware: Option<RawFirmware>,
}

#[derive(Deserialize)]
struct RawActivation {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct RawServerTime {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    timezone_offset: Option<i64>,
}

#[derive(Deserialize)]
struct RawFirmware {
    version: String,
    url: String,
}

/// One configured version-check endpoint.
pub struct OtaClient {
    check_url: String,
    headers: Vec<(String, String)>,
    post_data: Option<String>,
}

impl OtaClient {
    pub fn new(check_url: &str) -> Self {
        Self {
            check_url: check_url.to_string(),
            headers: Vec::new(),
            post_data: None,
        }
    }

    /// Adds a request header sent with every check (device id, language...).
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// JSON device description; its presence switches the check to POST.
    pub fn set_post_data(&mut self, post_data: String) {
        self.post_data = Some(post_data);
    }

    /// Performs one version-check round trip.
    pub fn check_version(
        &self,
        http: &mut dyn HttpClient,
        current_version: &str,
    ) -> Result<OtaCheckResult> {
        if self.check_url.len() < 10 {
            return Err(VoicelinkError::OtaCheck {
                message: "check URL is not properly set".to_string(),
            });
        }

        let mut headers = self.headers.clone();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        let method = if self.post_data.is_some() { "POST" } else { "GET" };
        let body = http.request(method, &self.check_url, &headers, self.post_data.as_deref())?;

        let raw: RawResponse =
            serde_json::from_str(&body).map_err(|e| VoicelinkError::OtaCheck {
                message: format!("response parse: {e}"),
            })?;

        let firmware = raw.firmware.ok_or_else(|| VoicelinkError::OtaCheck {
            message: "missing firmware block".to_string(),
        })?;

        let activation = raw.activation.map(|a| ActivationInfo {
            code: a.code.unwrap_or_default(),
            message: a.message.unwrap_or_default(),
        });

        let mqtt_config = raw.mqtt.map(|map| {
            map.into_iter()
                .filter_map(|(key, value)| {
                    value.as_str().map(|v| (key, v.to_string()))
                })
                .collect()
        });

        let server_time = raw.server_time.and_then(|t| {
            t.timestamp.map(|timestamp| ServerTime {
                timestamp_ms: timestamp as i64,
                timezone_offset_minutes: t.timezone_offset.unwrap_or(0),
            })
        });

        info!(
            current = current_version,
            advertised = %firmware.version,
            "version check complete"
        );

        Ok(OtaCheckResult {
            current_version: current_version.to_string(),
            firmware_version: firmware.version,
            firmware_url: firmware.url,
            activation,
            mqtt_config,
            server_time,
        })
    }
}

/// Applies the non-firmware side effects of a check result: merges broker
/// config into settings (rewriting only changed keys) and syncs the clock.
pub fn apply_side_effects(
    result: &OtaCheckResult,
    settings: &Settings,
    clock: &dyn DeviceClock,
) {
    if let Some(mqtt) = &result.mqtt_config {
        for (key, value) in mqtt {
            if settings.get_str("mqtt", key).as_deref() != Some(value) {
                debug!(key, "mqtt config updated");
                settings.set_str("mqtt", key, value);
            }
        }
    }

    if let Some(server_time) = &result.server_time {
        clock.set_system_time(server_time.local_unix_millis());
    }
}

// ---------------------------------------------------------------------------
// Version comparison
// ---------------------------------------------------------------------------

/// Splits a version string into numeric components.
pub fn parse_version(version: &str) -> Result<Vec<u64>> {
    version
        .split('.')
        .map(|segment| {
            segment.parse::<u64>().map_err(|e| VoicelinkError::VersionParse {
                version: version.to_string(),
                message: format!("segment '{segment}': {e}"),
            })
        })
        .collect()
}

/// Whether `candidate` is a newer version than `current`.
///
/// Numeric component comparison left to right; when one version is a strict
/// prefix of the other, the longer one is newer ("1.0.1" > "1.0").
pub fn is_newer(current: &str, candidate: &str) -> Result<bool> {
    let current = parse_version(current)?;
    let candidate = parse_version(candidate)?;

    for (cur, cand) in current.iter().zip(candidate.iter()) {
        if cand > cur {
            return Ok(true);
        }
        if cand < cur {
            return Ok(false);
        }
    }
    Ok(candidate.len() > current.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::MockClock;

    #[test]
    fn test_is_newer_numeric_not_lexicographic() {
        assert!(is_newer("1.2.3", "1.2.10").unwrap());
        assert!(!is_newer("1.2.10", "1.2.3").unwrap());
    }

    #[test]
    fn test_is_newer_prefix_rule() {
        assert!(is_newer("1.0", "1.0.1").unwrap());
        assert!(!is_newer("1.0.1", "1.0").unwrap());
    }

    #[test]
    fn test_is_newer_equal_versions() {
        assert!(!is_newer("2.0.0", "2.0.0").unwrap());
    }

    #[test]
    fn test_is_newer_major_decides_first() {
        assert!(is_newer("1.9.9", "2.0.0").unwrap());
        assert!(!is_newer("2.0.0", "1.9.9").unwrap());
    }

    #[test]
    fn test_malformed_segment_is_hard_error() {
        assert!(matches!(
            is_newer("1.0", "1.x.2"),
            Err(VoicelinkError::VersionParse { .. })
        ));
        assert!(matches!(
            is_newer("1.0-beta", "1.1"),
            Err(VoicelinkError::VersionParse { .. })
        ));
        assert!(parse_version("").is_err());
    }

    fn full_response() -> &'static str {
        r#"{
            "activation": {"code": "837421", "message": "Visit example.com and enter the code"},
            "mqtt": {"endpoint": "broker.example.com", "client_id": "dev-1"},
            "server_time": {"timestamp": 1700000000000.0, "timezone_offset": 480},
            "firmware": {"version": "1.4.0", "url": "https://ota.example.com/fw-1.4.0.bin"}
        }"#
    }

    #[test]
    fn test_check_version_parses_full_response() {
        let client = OtaClient::new("https://ota.example.com/check");
        let mut http = MockHttpClient::new();
        http.push_response(Ok(full_response().to_string()));

        let result = client.check_version(&mut http, "1.3.2").unwrap();

        assert_eq!(result.firmware_version, "1.4.0");
        assert_eq!(result.firmware_url, "https://ota.example.com/fw-1.4.0.bin");
        assert!(result.has_new_version().unwrap());

        let activation = result.activation.unwrap();
        assert_eq!(activation.code, "837421");

        let mqtt = result.mqtt_config.unwrap();
        assert_eq!(mqtt["endpoint"], "broker.example.com");

        let server_time = result.server_time.unwrap();
        assert_eq!(server_time.timezone_offset_minutes, 480);
        assert_eq!(
            server_time.local_unix_millis(),
            1_700_000_000_000 + 480 * 60 * 1000
        );
    }

    #[test]
    fn test_check_version_requires_firmware_block() {
        let client = OtaClient::new("https://ota.example.com/check");
        let mut http = MockHttpClient::new();
        http.push_response(Ok(r#"{"server_time": {"timestamp": 1}}"#.to_string()));

        let err = client.check_version(&mut http, "1.0.0").unwrap_err();
        assert!(err.to_string().contains("firmware"));
    }

    #[test]
    fn test_check_version_uses_post_when_device_info_present() {
        let mut client = OtaClient::new("https://ota.example.com/check");
        client.set_post_data(r#"{"board": "demo"}"#.to_string());
        client.set_header("Device-Id", "aa:bb");

        let mut http = MockHttpClient::new();
        http.push_response(Ok(
            r#"{"firmware": {"version": "1.0.0", "url": "u"}}"#.to_string()
        ));
        client.check_version(&mut http, "1.0.0").unwrap();

        let requests = http.requests();
        assert_eq!(requests[0].0, "POST");
        assert_eq!(requests[0].2.as_deref(), Some(r#"{"board": "demo"}"#));
    }

    #[test]
    fn test_check_version_rejects_unset_url() {
        let client = OtaClient::new("");
        let mut http = MockHttpClient::new();
        assert!(client.check_version(&mut http, "1.0.0").is_err());
    }

    #[test]
    fn test_side_effects_merge_mqtt_and_sync_clock() {
        let client = OtaClient::new("https://ota.example.com/check");
        let mut http = MockHttpClient::new();
        http.push_response(Ok(full_response().to_string()));
        let result = client.check_version(&mut http, "1.3.2").unwrap();

        let settings = Settings::in_memory();
        settings.set_str("mqtt", "endpoint", "old-broker");
        let clock = MockClock::new();

        apply_side_effects(&result, &settings, &clock);

        assert_eq!(
            settings.get_str("mqtt", "endpoint"),
            Some("broker.example.com".to_string())
        );
        assert_eq!(
            settings.get_str("mqtt", "client_id"),
            Some("dev-1".to_string())
        );
        assert_eq!(clock.applied().len(), 1);
    }

    #[test]
    fn test_no_new_version_when_equal() {
        let client = OtaClient::new("https://ota.example.com/check");
        let mut http = MockHttpClient::new();
        http.push_response(Ok(
            r#"{"firmware": {"version": "1.3.2", "url": "u"}}"#.to_string()
        ));
        let result = client.check_version(&mut http, "1.3.2").unwrap();
        assert!(!result.has_new_version().unwrap());
        assert!(result.activation.is_none());
        assert!(result.server_time.is_none());
    }
}
