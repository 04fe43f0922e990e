//! Scripted in-memory `Transport` for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use pve_api::{Method, Params, Transport};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Body(String),
    Status(u16, String),
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub method: Method,
    pub path: String,
    pub form: Option<Params>,
}

/// Replies are queued per `(method, path)`. The last queued reply for a
/// route is repeated once the queue is down to it.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, method: Method, path: &str, body: &str) -> Self {
        self.push(method, path, Reply::Body(body.to_string()))
    }

    pub fn reply_status(self, method: Method, path: &str, status: u16, body: &str) -> Self {
        self.push(method, path, Reply::Status(status, body.to_string()))
    }

    fn push(self, method: Method, path: &str, reply: Reply) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        form: Option<&Params>,
    ) -> pve_api::Result<String> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            form: form.cloned(),
        });

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&(method, path.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(code, body)) => Err(pve_api::Error::Api {
                path: path.to_string(),
                status: status_code(code),
                body,
            }),
            None => Err(pve_api::Error::Api {
                path: path.to_string(),
                status: status_code(501),
                body: "no scripted reply".into(),
            }),
        }
    }
}

fn status_code(code: u16) -> pve_api::StatusCode {
    pve_api::StatusCode::from_u16(code).unwrap()
}

pub(crate) const UPID: &str = "UPID:node7:00001234:0A1B2C3D:65F00000:qmstart:101:root@pam:";

pub(crate) fn status_path(upid: &str) -> String {
    let node = upid.split(':').nth(1).unwrap();
    format!("/nodes/{node}/tasks/{upid}/status")
}

pub(crate) const RUNNING: &str = r#"{"data":{"status":"running"}}"#;
pub(crate) const EXIT_OK: &str = r#"{"data":{"status":"stopped","exitstatus":"OK"}}"#;

pub(crate) fn submitted(upid: &str) -> String {
    format!(r#"{{"data":"{upid}"}}"#)
}
