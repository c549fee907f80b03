#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;

use ghproxy_provider_core::{
    TransportFailure, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamTransportErrorKind,
};

/// Replays canned results in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedUpstream {
    script: Mutex<VecDeque<Result<UpstreamHttpResponse, TransportFailure>>>,
    seen: Mutex<Vec<UpstreamHttpRequest>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(response(status, headers, body)));
        self
    }

    pub fn fail(self, kind: UpstreamTransportErrorKind) -> Self {
        self.script.lock().unwrap().push_back(Err(TransportFailure {
            kind,
            message: "scripted failure".to_string(),
        }));
        self
    }

    pub fn requests(&self) -> Vec<UpstreamHttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &str) -> UpstreamHttpResponse {
    UpstreamHttpResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: Bytes::from(body.to_string()),
    }
}

impl UpstreamClient for ScriptedUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportFailure>> + Send + 'a>>
    {
        self.seen.lock().unwrap().push(req);
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| {
                Err(TransportFailure {
                    kind: UpstreamTransportErrorKind::Other,
                    message: "script exhausted".to_string(),
                })
            })
        })
    }
}
