//! Test utilities & fixtures.
//! A scripted in-process transport plus helpers that lay out a data directory
//! in a temp dir and open a [`Bridge`] over it.
#![allow(dead_code)] // each test binary uses a different subset

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rconbridge::bridge::Bridge;
use rconbridge::config::Config;
use rconbridge::rcon::{Endpoint, RconTransport, TransportError};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const STEVE_ID: &str = "28838c3022e0cb886568abcaa6f37f8d";
pub const ALEX_ID: &str = "13dbca05ba8166e2e60c50fe271f2417";
/// Not present in the fixture identities.
pub const CARL_ID: &str = "0002a1b2c3d4e5f60718293a4b5c6d7e";

#[derive(Clone)]
struct Rule {
    server: Option<String>,
    prefix: String,
    delay: Duration,
    reply: Result<String, TransportError>,
}

/// Replies by (server, command prefix); first matching rule wins. Unmatched
/// commands get an empty (silently successful) response.
#[derive(Default)]
pub struct MockTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, String)>>,
    endpoints: Mutex<Vec<Endpoint>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, server: Option<&str>, prefix: &str, text: &str) {
        self.push(server, prefix, Duration::ZERO, Ok(text.to_string()));
    }

    pub fn fail(&self, server: Option<&str>, prefix: &str, err: TransportError) {
        self.push(server, prefix, Duration::ZERO, Err(err));
    }

    pub fn slow(&self, server: Option<&str>, prefix: &str, delay: Duration, text: &str) {
        self.push(server, prefix, delay, Ok(text.to_string()));
    }

    fn push(
        &self,
        server: Option<&str>,
        prefix: &str,
        delay: Duration,
        reply: Result<String, TransportError>,
    ) {
        self.rules.lock().unwrap().push(Rule {
            server: server.map(str::to_string),
            prefix: prefix.to_string(),
            delay,
            reply,
        });
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.endpoints.lock().unwrap().last().cloned()
    }
}

impl RconTransport for MockTransport {
    fn execute(&self, endpoint: &Endpoint, command: &str) -> Result<String, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.server_id.clone(), command.to_string()));
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.server.as_deref().map_or(true, |s| s == endpoint.server_id)
                    && command.starts_with(&r.prefix)
            })
            .cloned();
        match rule {
            Some(r) => {
                if !r.delay.is_zero() {
                    std::thread::sleep(r.delay);
                }
                r.reply
            }
            None => Ok(String::new()),
        }
    }
}

pub fn write_json(dir: &Path, file: &str, value: &Value) {
    std::fs::write(dir.join(file), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Two enabled servers, `alpha` flagged default, plus a disabled `gamma`.
pub fn servers() -> Value {
    json!({
        "_comment": "test servers",
        "alpha": {"name": "Alpha", "host": "10.0.0.1", "port": 27020, "password": "a", "default": true, "connection_timeout": 1},
        "beta": {"name": "Beta", "host": "10.0.0.2", "port": 27021, "password": "b", "connection_timeout": 1},
        "gamma": {"name": "Gamma", "host": "10.0.0.3", "port": 27022, "password": "c", "enabled": false}
    })
}

pub fn levels() -> Value {
    json!({
        "1": [{"cmd": "GiveItemToEOSID {eos_id} Wood {quantity} 0 0", "quantity": 10}],
        "2": [
            {"cmd": "GiveItemToEOSID {eos_id} Stone 5 0 0"},
            {"cmd": "GiveItemToEOSID {eos_id} Metal 5 0 0"}
        ],
        "3": []
    })
}

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn read(&self, file: &str) -> Value {
        let raw = std::fs::read_to_string(self.dir.path().join(file)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    pub async fn open(&self, transport: Arc<MockTransport>) -> Bridge {
        let transport: Arc<dyn RconTransport> = transport;
        Bridge::open_with(self.config.clone(), Some(transport), |_: &str| None)
            .await
            .unwrap()
    }
}

/// Data dir with servers, levels and two known players.
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    write_json(dir.path(), "servers.json", &servers());
    write_json(dir.path(), "levels.json", &levels());
    write_json(
        dir.path(),
        "identities.json",
        &json!({"Steve": STEVE_ID, "Alex": ALEX_ID, "Broken": "not-an-id"}),
    );
    let mut config = Config::default();
    config.bridge.data_dir = dir.path().display().to_string();
    config.gateway.outer_grace_ms = 50;
    config.scanner.interval_secs = 1;
    config.scanner.query_timeout_ms = 300;
    config.autosave.snapshot_retention = 0;
    config.logging.level = "error".into();
    Fixture { dir, config }
}
