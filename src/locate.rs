//! Pod discovery by label selector.

use std::future::Future;

use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::config::Selector;
use crate::error::{BoxError, Error, Result};
use crate::readiness::is_ready;

/// Lists pods in a namespace that match a label selector.
///
/// Implemented for [`kube::Client`] with server-side label filtering.
pub trait PodLister {
    /// Error returned when the listing fails.
    type Error: Into<BoxError>;

    /// Lists pods in `namespace` matching the canonical `selector` string.
    fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> impl Future<Output = std::result::Result<Vec<Pod>, Self::Error>> + Send;
}

impl PodLister for Client {
    type Error = kube::Error;

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> std::result::Result<Vec<Pod>, kube::Error> {
        let pods: Api<Pod> = Api::namespaced(self.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }
}

/// Finds the first ready pod in `namespace` matching `selector`.
///
/// Pods are considered in the order the listing returns them; the first one
/// whose `Ready` condition is `True` wins. Repeated calls against an
/// unchanged listing select the same pod.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if `namespace` or `selector` is empty, or a
///   label cannot be expressed in a selector string.
/// - [`Error::Transport`] if the listing fails.
/// - [`Error::NotFound`] if the listing is empty.
/// - [`Error::NoReadyInstance`] if no listed pod is ready.
pub async fn locate<L>(lister: &L, namespace: &str, selector: &Selector) -> Result<String>
where
    L: PodLister + ?Sized,
{
    if namespace.is_empty() {
        return Err(Error::InvalidArgument("namespace must not be empty"));
    }

    if selector.is_empty() {
        return Err(Error::InvalidArgument("selector must not be empty"));
    }

    selector.validate()?;

    let selector = selector.to_string();
    let pods = lister
        .list_pods(namespace, &selector)
        .await
        .map_err(|e| {
            Error::transport(
                format!("listing pods in namespace {namespace} with selector {selector}"),
                e,
            )
        })?;

    tracing::debug!(
        "found {} pods in {namespace} matching {selector}",
        pods.len()
    );

    if pods.is_empty() {
        return Err(Error::NotFound {
            namespace: namespace.to_string(),
            selector,
        });
    }

    for pod in &pods {
        if is_ready(pod) {
            let name = pod.name_any();
            tracing::debug!("selected pod {namespace}/{name}");
            return Ok(name);
        }

        tracing::debug!("skipping pod {namespace}/{} (not ready)", pod.name_any());
    }

    Err(Error::NoReadyInstance {
        namespace: namespace.to_string(),
        selector,
        candidates: pods.len(),
    })
}
