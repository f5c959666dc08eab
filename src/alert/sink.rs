//! Alert delivery.
//!
//! Sinks receive finished records. A delivery failure is reported back to the
//! caller but never retracts the alert: emission is at-most-once from the
//! engine's point of view, and any retrying happens inside the sink.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde_json::{Value, json};

use crate::alert::record::AlertRecord;
use crate::error::SinkError;

/// HTTP statuses treated as a successful delivery.
const ACCEPTED_STATUSES: [u16; 3] = [200, 201, 202];
/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 200;

/// Destination for emitted alerts.
pub trait AlertSink: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn deliver(&mut self, record: &AlertRecord) -> Result<(), SinkError>;

    /// Failures from deliveries that completed after `deliver` returned.
    /// Synchronous sinks never have any.
    fn drain_failures(&mut self) -> Vec<SinkError> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Total attempts per alert, at least one
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Value of the `sender` envelope field
    pub sender: String,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            sender: "dwelltrack".to_string(),
        }
    }
}

/// POSTs each alert as JSON to a configured URL, retrying with a fixed delay.
pub struct WebhookSink {
    config: WebhookConfig,
    agent: ureq::Agent,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Post a test payload to verify the endpoint is reachable.
    pub fn check_connection(&self) -> Result<u16, SinkError> {
        let payload = json!({
            "test": true,
            "message": format!("connection test from {}", self.config.sender),
            "timestamp": Utc::now(),
        });
        self.post(&payload)
    }

    fn post(&self, body: &Value) -> Result<u16, SinkError> {
        let response = self
            .agent
            .post(&self.config.url)
            .set("Content-Type", "application/json")
            .send_json(body);
        match response {
            Ok(resp) => {
                let status = resp.status();
                if ACCEPTED_STATUSES.contains(&status) {
                    Ok(status)
                } else {
                    Err(SinkError::Status {
                        status,
                        body: truncated_body(resp),
                    })
                }
            }
            Err(ureq::Error::Status(status, resp)) => Err(SinkError::Status {
                status,
                body: truncated_body(resp),
            }),
            Err(ureq::Error::Transport(transport)) => Err(SinkError::Transport(transport.to_string())),
        }
    }
}

fn truncated_body(resp: ureq::Response) -> String {
    let mut body = String::new();
    let _ = resp
        .into_reader()
        .take(MAX_ERROR_BODY as u64)
        .read_to_string(&mut body);
    body
}

/// The record plus delivery envelope fields (`sent_at`, `sender`).
pub fn webhook_body(record: &AlertRecord, sender: &str) -> Result<Value, SinkError> {
    let mut body = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut body {
        map.insert("sent_at".to_string(), json!(Utc::now()));
        map.insert("sender".to_string(), json!(sender));
    }
    Ok(body)
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&mut self, record: &AlertRecord) -> Result<(), SinkError> {
        let body = webhook_body(record, &self.config.sender)?;
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.post(&body) {
                Ok(status) => {
                    log::info!(
                        "alert for track {} delivered to webhook (HTTP {})",
                        record.metadata.track_id,
                        status
                    );
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("webhook attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt >= attempts {
                        return Err(SinkError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                }
            }
            if !self.config.retry_delay.is_zero() {
                std::thread::sleep(self.config.retry_delay);
            }
            attempt += 1;
        }
    }
}

/// Writes each alert as a pretty-printed JSON file into a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Preferred file for `record`. Names carry microseconds; a record that
    /// still collides with an existing file gets a numeric suffix on delivery.
    pub fn path_for(&self, record: &AlertRecord) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(record)))
    }

    /// Create a file for `record` without replacing an earlier one.
    fn create_unique(&self, record: &AlertRecord) -> Result<(PathBuf, File), SinkError> {
        let stem = file_stem(record);
        let mut suffix = 0u32;
        loop {
            let path = if suffix == 0 {
                self.dir.join(format!("{}.json", stem))
            } else {
                self.dir.join(format!("{}_{}.json", stem, suffix))
            };
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn file_stem(record: &AlertRecord) -> String {
    format!(
        "alert_{}_{}",
        record.when.format("%Y%m%d_%H%M%S_%6f"),
        record.metadata.track_id
    )
}

impl AlertSink for JsonDirSink {
    fn name(&self) -> &str {
        "json_dir"
    }

    fn deliver(&mut self, record: &AlertRecord) -> Result<(), SinkError> {
        let (path, file) = self.create_unique(record)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        log::info!("alert saved to {}", path.display());
        Ok(())
    }
}

/// Runs another sink on a worker thread so callers never wait on delivery.
///
/// Records are queued on a bounded channel; when it is full the alert is
/// dropped and `QueueFull` is returned. Dropping the sink closes the queue
/// and waits for pending deliveries.
pub struct BackgroundSink {
    name: String,
    tx: Option<Sender<AlertRecord>>,
    failures: Receiver<SinkError>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundSink {
    pub fn spawn<S: AlertSink + 'static>(mut inner: S, capacity: usize) -> Self {
        let name = format!("background({})", inner.name());
        let (tx, rx) = crossbeam_channel::bounded::<AlertRecord>(capacity);
        let (fail_tx, failures) = crossbeam_channel::unbounded();

        let worker = std::thread::spawn(move || {
            for record in rx.iter() {
                if let Err(e) = inner.deliver(&record) {
                    log::error!(
                        "{} delivery failed for track {}: {}",
                        inner.name(),
                        record.metadata.track_id,
                        e
                    );
                    let _ = fail_tx.send(e);
                }
            }
        });

        Self {
            name,
            tx: Some(tx),
            failures,
            worker: Some(worker),
        }
    }
}

impl AlertSink for BackgroundSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, record: &AlertRecord) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::WorkerGone)?;
        tx.try_send(record.clone()).map_err(|e| match e {
            TrySendError::Full(r) => SinkError::QueueFull {
                track_id: r.metadata.track_id,
            },
            TrySendError::Disconnected(_) => SinkError::WorkerGone,
        })
    }

    fn drain_failures(&mut self) -> Vec<SinkError> {
        self.failures.try_iter().collect()
    }
}

impl Drop for BackgroundSink {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::record::{
        AlertLocation, AlertMetadata, AlertMethod, AlertQuantity, Orientation, Severity,
    };
    use chrono::DateTime;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    fn record(track_id: u64) -> AlertRecord {
        AlertRecord {
            what: "Sleeping person detected".to_string(),
            when: DateTime::from_timestamp(1_700_000_010, 0).unwrap(),
            location: AlertLocation {
                location: "Lobby".to_string(),
                bounding_box: [100.0, 100.0, 200.0, 300.0],
                orientation: Orientation::Vertical,
            },
            who: "dwelltrack".to_string(),
            why: "test".to_string(),
            how: AlertMethod {
                method: "Text prompt detection".to_string(),
                prompt_used: "person sleeping".to_string(),
                confidence_score: 0.95,
            },
            how_much: AlertQuantity {
                detection_count_in_period: 11,
                persistence_seconds: 10.0,
            },
            metadata: AlertMetadata {
                alert_type: "sleeping_person".to_string(),
                severity: Severity::Medium,
                requires_action: true,
                track_id,
            },
        }
    }

    /// Accepts `statuses.len()` connections, answering each with the next
    /// status and capturing the request bodies.
    fn serve(statuses: Vec<u16>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut bodies = Vec::new();
            for status in statuses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(v) = lower.strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();
                bodies.push(String::from_utf8(body).unwrap());
                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                )
                .unwrap();
            }
            bodies
        });
        (url, handle)
    }

    fn fast_config(url: String, attempts: u32) -> WebhookConfig {
        WebhookConfig {
            retry_attempts: attempts,
            retry_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
            ..WebhookConfig::new(url)
        }
    }

    #[test]
    fn test_body_has_envelope() {
        let body = webhook_body(&record(3), "lab").unwrap();
        assert_eq!(body["sender"], "lab");
        assert!(body["sent_at"].is_string());
        assert_eq!(body["metadata"]["track_id"], 3);
        assert_eq!(body["where"]["location"], "Lobby");
    }

    #[test]
    fn test_webhook_retries_then_succeeds() {
        let (url, server) = serve(vec![500, 202]);
        let mut sink = WebhookSink::new(fast_config(url, 3));
        sink.deliver(&record(1)).unwrap();
        let bodies = server.join().unwrap();
        assert_eq!(bodies.len(), 2);
        let posted: Value = serde_json::from_str(&bodies[1]).unwrap();
        assert_eq!(posted["what"], "Sleeping person detected");
    }

    #[test]
    fn test_webhook_gives_up() {
        let (url, server) = serve(vec![503, 503]);
        let mut sink = WebhookSink::new(fast_config(url, 2));
        let err = sink.deliver(&record(1)).unwrap_err();
        assert!(matches!(err, SinkError::RetriesExhausted { attempts: 2, .. }));
        server.join().unwrap();
    }

    #[test]
    fn test_check_connection() {
        let (url, server) = serve(vec![200]);
        let sink = WebhookSink::new(fast_config(url, 1));
        assert_eq!(sink.check_connection().unwrap(), 200);
        let bodies = server.join().unwrap();
        let posted: Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(posted["test"], true);
    }

    #[test]
    fn test_check_connection_reports_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);
        let sink = WebhookSink::new(fast_config(url, 1));
        assert!(matches!(sink.check_connection(), Err(SinkError::Transport(_))));
    }

    #[test]
    fn test_json_dir_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonDirSink::new(dir.path().join("alerts")).unwrap();
        let rec = record(9);
        sink.deliver(&rec).unwrap();
        let path = sink.path_for(&rec);
        assert!(path.ends_with("alert_20231114_221330_000000_9.json"));
        let back: AlertRecord = serde_json::from_reader(File::open(path).unwrap()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_json_dir_sink_keeps_records_from_same_instant() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonDirSink::new(dir.path()).unwrap();
        let first = record(9);
        let mut second = record(9);
        second.how_much.persistence_seconds = 12.5;
        sink.deliver(&first).unwrap();
        sink.deliver(&second).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "alert_20231114_221330_000000_9.json".to_string(),
                "alert_20231114_221330_000000_9_1.json".to_string(),
            ]
        );
        let back: AlertRecord =
            serde_json::from_reader(File::open(dir.path().join(&names[1])).unwrap()).unwrap();
        assert_eq!(back, second);
    }

    #[test]
    fn test_json_dir_sink_subsecond_names_differ() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonDirSink::new(dir.path()).unwrap();
        let first = record(3);
        let mut second = record(3);
        second.when = DateTime::from_timestamp(1_700_000_010, 250_000_000).unwrap();
        assert_ne!(sink.path_for(&first), sink.path_for(&second));
        assert!(sink.path_for(&second).ends_with("alert_20231114_221330_250000_3.json"));
    }

    #[derive(Clone, Default)]
    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
        fail: bool,
    }

    impl AlertSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn deliver(&mut self, record: &AlertRecord) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(record.metadata.track_id);
            if self.fail {
                Err(SinkError::Transport("unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_background_sink_delivers_on_worker() {
        let inner = Recording::default();
        let seen = inner.seen.clone();
        let mut sink = BackgroundSink::spawn(inner, 8);
        sink.deliver(&record(1)).unwrap();
        sink.deliver(&record(2)).unwrap();
        drop(sink);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_background_sink_reports_failures() {
        let inner = Recording {
            fail: true,
            ..Recording::default()
        };
        let seen = inner.seen.clone();
        let mut sink = BackgroundSink::spawn(inner, 8);
        sink.deliver(&record(5)).unwrap();
        let mut failures = Vec::new();
        for _ in 0..200 {
            failures.extend(sink.drain_failures());
            if !failures.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(failures.len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }
}
