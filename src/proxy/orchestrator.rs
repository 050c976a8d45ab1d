//! The forwarding entry point.
//!
//! Composes view → mapped target → filtered request → connector → relay.

use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::proxy::connector::{MappedRequest, Timeouts, UpstreamConnector};
use crate::proxy::error::ProxyError;
use crate::proxy::exchange::Exchange;
use crate::proxy::headers::{HeaderFilter, Hop};
use crate::proxy::relay::{ResponseRelay, ResponseView};
use crate::proxy::request::RequestView;
use crate::proxy::target::{TargetError, UpstreamTarget};

/// Transparent single-upstream forwarder.
///
/// Cheap to clone; every clone shares the same immutable target.
#[derive(Debug, Clone)]
pub struct Proxy {
    target: Arc<UpstreamTarget>,
    filter: HeaderFilter,
    connector: UpstreamConnector,
    relay: ResponseRelay,
}

impl Proxy {
    /// Forward to `target` with default timeouts and header policy.
    pub fn new(target: UpstreamTarget) -> Self {
        Self::with_options(target, HeaderFilter::default(), Timeouts::default())
    }

    pub fn with_options(target: UpstreamTarget, filter: HeaderFilter, timeouts: Timeouts) -> Self {
        Self {
            target: Arc::new(target),
            relay: ResponseRelay::new(filter.clone(), timeouts.body_idle),
            filter,
            connector: UpstreamConnector::new(timeouts),
        }
    }

    /// Build from a loaded configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, TargetError> {
        let target = UpstreamTarget::parse(&config.upstream.base_uri)?;
        let forwarding = &config.forwarding;
        let filter = HeaderFilter::new(
            forwarding.enabled.then(|| forwarding.header.clone()),
            forwarding.via.clone(),
        )
        .with_forwarded_host(forwarding.enabled.then(|| forwarding.host_header.clone()));
        Ok(Self::with_options(target, filter, Timeouts::from(&config.timeouts)))
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Forward `request` to the upstream and relay its response.
    ///
    /// Returns once the upstream status and headers are in; the body of the
    /// returned view is still streaming.
    pub async fn act(&self, request: RequestView) -> Result<ResponseView, ProxyError> {
        let mut exchange = Exchange::start(request.method(), request.path());
        self.run(request, &mut exchange).await
    }

    async fn run(&self, request: RequestView, exchange: &mut Exchange) -> Result<ResponseView, ProxyError> {
        let origin = request.origin();
        let uri = self
            .target
            .map(request.path(), request.query())
            .map_err(|e| exchange.fail(e))?;
        exchange.mapped(&uri);

        let (method, headers, body) = request.into_parts();
        let mapped = MappedRequest {
            method,
            uri,
            headers: self.filter.filter(&headers, Hop::Request, &origin),
            body,
        };

        exchange.forwarding();
        let raw = self
            .connector
            .forward(mapped)
            .await
            .map_err(|e| exchange.fail(e))?;

        let view = self.relay.relay(raw);
        exchange.relayed(view.status());
        Ok(view)
    }
}
