//! Shared fixtures: model files, test config, a counting loader and a tiny
//! HTTP receiver that answers with scripted statuses.
#![allow(dead_code)]

use modelsnap_ingest::config::{RenderConfig, RetryConfig, UploadConfig};
use modelsnap_ingest::{Config, LoadError, Model, ModelLoader, ObjLoader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const TRIANGLE: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
pub const BROKEN: &str = "v 1 2\n";

pub fn write_model(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn test_config(watch_dir: &Path, work_dir: &Path, endpoint: &str) -> Config {
    Config {
        watch_dir: watch_dir.to_path_buf(),
        work_dir: work_dir.to_path_buf(),
        rescan_interval_ms: 50,
        batch_size: 2,
        shutdown_timeout_secs: 10,
        render: RenderConfig { resolution: 32 },
        upload: UploadConfig {
            url: Some(endpoint.to_string()),
            timeout_secs: 5,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 50,
            },
            ..UploadConfig::default()
        },
        ..Config::default()
    }
}

/// Every `*.zip` under the batch directories of `work_dir`.
pub fn archives(work_dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(work_dir) else {
        return found;
    };
    for batch in entries.flatten() {
        let Ok(files) = std::fs::read_dir(batch.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().is_some_and(|e| e == "zip") {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

pub fn zip_entries(archive: &Path) -> Vec<String> {
    let file = std::fs::File::open(archive).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    names
}

/// OBJ loader that counts loads per file name.
#[derive(Default)]
pub struct CountingLoader {
    loads: Mutex<HashMap<String, usize>>,
}

impl CountingLoader {
    pub fn loads(&self, name: &str) -> usize {
        self.loads.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<Model, LoadError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        *self.loads.lock().unwrap().entry(name).or_default() += 1;
        ObjLoader.load(path)
    }
}

/// One request as seen by [`Receiver`].
#[derive(Debug, Clone)]
pub struct Received {
    pub head: String,
    pub body: Vec<u8>,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    pub fn body_contains(&self, needle: &str) -> bool {
        self.body
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }
}

/// HTTP/1.1 endpoint answering with `statuses` in order, repeating the last.
pub struct Receiver {
    pub url: String,
    requests: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl Receiver {
    pub async fn start(statuses: Vec<u16>) -> Self {
        Self::start_with(move |served| {
            let status = statuses
                .get(served)
                .or(statuses.last())
                .copied()
                .unwrap_or(200);
            let body = format!("status {status}");
            format!(
                "HTTP/1.1 {status} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
        })
        .await
    }

    /// Answer every request with `status` and a body cut short of its
    /// declared length.
    pub async fn start_truncated(status: u16) -> Self {
        Self::start_with(move |_| {
            format!(
                "HTTP/1.1 {status} Scripted\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial"
            )
        })
        .await
    }

    /// `respond` gets the 0-based request number and returns the raw response.
    async fn start_with(respond: impl Fn(usize) -> String + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let task = tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut stream, _)) = listener.accept().await {
                let response = respond(served);
                served += 1;

                if let Some(request) = read_request(&mut stream).await {
                    recorded.lock().unwrap().push(request);
                }
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            url: format!("http://{addr}/WeatherForecast/ZipReceiver"),
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<Received> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<Received> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut body = buf[head_end + 4..].to_vec();
    let parsed = Received {
        head: head.clone(),
        body: Vec::new(),
    };

    match parsed.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        Some(length) => {
            while body.len() < length {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
        }
        // Chunked: read to the terminating chunk.
        None => {
            while !body.ends_with(b"0\r\n\r\n") {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
        }
    }

    Some(Received { head, body })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A loopback URL nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/WeatherForecast/ZipReceiver")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
