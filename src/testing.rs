//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use http::{Request, Response};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::client::Body;
use tower::Service;

use crate::error::BoxError;
use crate::locate::PodLister;
use crate::tunnel::{Forward, ForwardTarget, Forwarder};

/// Builds a pod whose `Ready` condition is `True` or `False`.
pub fn make_pod(name: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A [`PodLister`] returning a fixed listing and recording its queries.
pub struct FakeLister {
    result: Result<Vec<Pod>, &'static str>,
    queries: Mutex<Vec<(String, String)>>,
}

impl FakeLister {
    pub fn new(pods: Vec<Pod>) -> Self {
        Self {
            result: Ok(pods),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &'static str) -> Self {
        Self {
            result: Err(message),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }
}

impl PodLister for FakeLister {
    type Error = std::io::Error;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Self::Error> {
        self.queries
            .lock()
            .unwrap()
            .push((namespace.to_string(), selector.to_string()));

        self.result.clone().map_err(std::io::Error::other)
    }
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Succeed,
    Fail(&'static str),
    Hang,
}

#[derive(Debug, Default)]
struct ForwardLog {
    targets: Vec<ForwardTarget>,
    activations: usize,
    releases: usize,
}

/// A [`Forwarder`] recording construct/activate/release calls.
pub struct FakeForwarder {
    outcome: Outcome,
    log: Arc<Mutex<ForwardLog>>,
}

impl FakeForwarder {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            log: Arc::default(),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_outcome(Outcome::Succeed)
    }

    pub fn failing(message: &'static str) -> Self {
        Self::with_outcome(Outcome::Fail(message))
    }

    /// Activation never completes.
    pub fn hanging() -> Self {
        Self::with_outcome(Outcome::Hang)
    }

    pub fn targets(&self) -> Vec<ForwardTarget> {
        self.log.lock().unwrap().targets.clone()
    }

    pub fn activations(&self) -> usize {
        self.log.lock().unwrap().activations
    }

    pub fn releases(&self) -> usize {
        self.log.lock().unwrap().releases
    }
}

impl Forwarder for FakeForwarder {
    type Forward = FakeForward;

    fn forward(&self, target: &ForwardTarget) -> FakeForward {
        self.log.lock().unwrap().targets.push(target.clone());

        FakeForward {
            local: target.local,
            outcome: self.outcome,
            log: Arc::clone(&self.log),
        }
    }
}

#[derive(Debug)]
pub struct FakeForward {
    local: SocketAddr,
    outcome: Outcome,
    log: Arc<Mutex<ForwardLog>>,
}

impl Forward for FakeForward {
    type Error = BoxError;

    async fn activate(&mut self) -> Result<SocketAddr, BoxError> {
        self.log.lock().unwrap().activations += 1;

        match self.outcome {
            Outcome::Succeed => {
                let mut local = self.local;
                if local.port() == 0 {
                    local.set_port(49152);
                }

                Ok(local)
            }

            Outcome::Fail(message) => Err(message.into()),
            Outcome::Hang => std::future::pending().await,
        }
    }

    fn release(&mut self) {
        self.log.lock().unwrap().releases += 1;
    }
}

/// A mock API server answering requests by method and path prefix.
///
/// Unmatched requests get a 404 `Status`.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.responses.lock().unwrap().insert(
            ("GET".to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        responses
            .iter()
            .find(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .map(|(_, resp)| resp.clone())
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let (status, body) = self
            .find_response(req.method().as_str(), req.uri().path())
            .unwrap_or_else(|| (404, status_json(404, "NotFound", "not found")));

        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))?)
        })
    }
}

/// A Kubernetes `Status` failure body.
pub fn status_json(code: u16, reason: &str, message: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// A `PodList` body holding `pods`.
pub fn pod_list_json(pods: &[Pod]) -> String {
    serde_json::json!({
        "kind": "PodList",
        "apiVersion": "v1",
        "metadata": { "resourceVersion": "1" },
        "items": pods
    })
    .to_string()
}
