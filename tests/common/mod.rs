#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tiny_http::{Header, Response, Server};

use username_avail::check::AvailabilityService;
use username_avail::error::ServiceError;

/// Local HTTP stand-in for the availability service.
///
/// Registered names are taken; `register` claims a free name and answers
/// 409 with a plain-text reason for a taken one.
pub struct StubServer {
    server: Arc<Server>,
    state: Arc<StubState>,
    worker: Option<JoinHandle<()>>,
    pub base_url: String,
}

#[derive(Default)]
pub struct StubState {
    taken: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, String)>>,
    fail_checks: AtomicBool,
    garble_checks: AtomicBool,
}

impl StubServer {
    pub fn start(taken: &[&str]) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind stub server"));
        let addr = server
            .server_addr()
            .to_ip()
            .expect("stub server has an ip address");
        let state = Arc::new(StubState::default());
        state
            .taken
            .lock()
            .extend(taken.iter().map(|s| s.to_string()));

        let worker = {
            let server = Arc::clone(&server);
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for mut request in server.incoming_requests() {
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);
                    let username = serde_json::from_str::<serde_json::Value>(&body)
                        .ok()
                        .and_then(|v| v["username"].as_str().map(str::to_string));
                    let path = request.url().to_string();
                    state
                        .requests
                        .lock()
                        .push((path.clone(), username.clone().unwrap_or_default()));
                    let response = match (path.as_str(), username) {
                        (_, None) => Response::from_string("Invalid JSON").with_status_code(400),
                        ("/check-username", _) if state.fail_checks.load(Ordering::SeqCst) => {
                            Response::from_string("boom").with_status_code(500)
                        }
                        ("/check-username", _) if state.garble_checks.load(Ordering::SeqCst) => {
                            Response::from_string("not-json").with_header(json_header())
                        }
                        ("/check-username", Some(name)) => {
                            let available = !state.taken.lock().contains(&name);
                            Response::from_string(format!("{{\"available\":{available}}}"))
                                .with_header(json_header())
                        }
                        ("/register", Some(name)) => {
                            if state.taken.lock().insert(name) {
                                Response::from_string("Registered successfully")
                            } else {
                                Response::from_string("Username already taken")
                                    .with_status_code(409)
                            }
                        }
                        _ => Response::from_string("not found").with_status_code(404),
                    };
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            server,
            state,
            worker: Some(worker),
            base_url: format!("http://{addr}"),
        }
    }

    pub fn take(&self, name: &str) {
        self.state.taken.lock().insert(name.to_string());
    }

    pub fn fail_checks(&self, fail: bool) {
        self.state.fail_checks.store(fail, Ordering::SeqCst);
    }

    /// Answer checks with `200` and a body that is not JSON.
    pub fn garble_checks(&self, garble: bool) {
        self.state.garble_checks.store(garble, Ordering::SeqCst);
    }

    /// `(path, username)` for every request received so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|(p, _)| p == path).count()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).expect("static header")
}

/// Scripted in-process service with per-call gates.
///
/// A held key (`check:<name>` or `register:<name>`) blocks the matching call
/// until released, which lets tests choose the order responses arrive in.
#[derive(Default)]
pub struct FakeService {
    taken: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    register_error: Mutex<Option<(u16, String)>>,
    held: Mutex<HashSet<String>>,
    released: Condvar,
    calls: Mutex<Vec<String>>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self, name: &str) {
        self.taken.lock().insert(name.to_string());
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn reject_registrations(&self, status: u16, message: &str) {
        *self.register_error.lock() = Some((status, message.to_string()));
    }

    pub fn hold(&self, key: &str) {
        self.held.lock().insert(key.to_string());
    }

    pub fn release(&self, key: &str) {
        self.held.lock().remove(key);
        self.released.notify_all();
    }

    /// Every call made so far, as `check:<name>` / `register:<name>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Block until `key` has been called, or panic after a second.
    pub fn wait_for_call(&self, key: &str) {
        wait_until(Duration::from_secs(1), || {
            self.calls.lock().iter().any(|c| c == key)
        });
    }

    fn enter(&self, key: String) {
        self.calls.lock().push(key.clone());
        let mut held = self.held.lock();
        while held.contains(&key) {
            self.released.wait(&mut held);
        }
    }
}

impl AvailabilityService for FakeService {
    fn check_username(&self, name: &str) -> Result<bool, ServiceError> {
        self.enter(format!("check:{name}"));
        if self.failing.lock().contains(name) {
            return Err(ServiceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(!self.taken.lock().contains(name))
    }

    fn register(&self, name: &str) -> Result<(), ServiceError> {
        self.enter(format!("register:{name}"));
        if let Some((status, message)) = self.register_error.lock().clone() {
            return Err(ServiceError::Rejected { status, message });
        }
        if !self.taken.lock().insert(name.to_string()) {
            return Err(ServiceError::Rejected {
                status: 409,
                message: "Username already taken".into(),
            });
        }
        Ok(())
    }
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        thread::sleep(Duration::from_millis(5));
    }
}
