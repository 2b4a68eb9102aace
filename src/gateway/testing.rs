//! In-memory [`Transport`] scripted per route, for unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;

use serde_json::Value;

use super::error::GatewayError;
use super::types::{ODataRequest, Transport};

type Reply = Result<Value, GatewayError>;

/// Replies are looked up by [`ODataRequest::route`]: queued replies first,
/// then the sticky one. Unscripted updates and deletes succeed; anything
/// else unscripted answers 404.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<ODataRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, route: &str, reply: Reply) -> Self {
        self.push(route, reply);
        self
    }

    pub fn always(self, route: &str, reply: Reply) -> Self {
        self.sticky.lock().unwrap().insert(route.to_string(), reply);
        self
    }

    pub fn push(&self, route: &str, reply: Reply) {
        self.queued
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<ODataRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn routes(&self) -> Vec<String> {
        self.requests().iter().map(ODataRequest::route).collect()
    }

    pub fn count(&self, route: &str) -> usize {
        self.routes().iter().filter(|r| *r == route).count()
    }

    /// Body of the last request sent to `route`, if any.
    pub fn last_body(&self, route: &str) -> Option<Value> {
        self.requests()
            .into_iter()
            .rev()
            .find(|r| r.route() == route)
            .and_then(|r| match r {
                ODataRequest::Create { data, .. } | ODataRequest::Update { data, .. } => Some(data),
                _ => None,
            })
    }

    /// Parameter value of the last function call to `name`.
    pub fn last_param(&self, name: &str, param: &str) -> Option<String> {
        self.requests()
            .into_iter()
            .rev()
            .find_map(|r| match r {
                ODataRequest::Function { name: n, params, .. } if n == name => params
                    .into_iter()
                    .find(|(k, _)| k == param)
                    .map(|(_, v)| v),
                _ => None,
            })
    }

    fn reply(&self, request: &ODataRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        let route = request.route();

        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&route)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(reply) = self.sticky.lock().unwrap().get(&route) {
            return reply.clone();
        }
        match request {
            ODataRequest::Update { .. } | ODataRequest::Delete { .. } => Ok(Value::Null),
            _ => Err(GatewayError::Http {
                status: 404,
                message: format!("no scripted reply for {route}"),
            }),
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &ODataRequest) -> impl Future<Output = Reply> + Send {
        let reply = self.reply(request);
        async move { reply }
    }
}
