use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use pcl_types::{Code, Group, Peer, Status};

use crate::context::{ClientContext, RequestContext};
use crate::handler::{proceed, Handler};

/// Turns the targeting options into the ordered list of peers that will
/// receive the proposal.
///
/// Precedence: explicit targets are used verbatim; otherwise the discovered
/// peers go through the selection service and then the target filter. The
/// result is written back to `Opts::targets` and never re-resolved.
#[derive(Default)]
pub struct TargetResolutionHandler {
    next: Option<Box<dyn Handler>>,
}

impl TargetResolutionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Box<dyn Handler>) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl Handler for TargetResolutionHandler {
    fn name(&self) -> &str {
        "target-resolution"
    }

    fn set_next(&mut self, next: Box<dyn Handler>) {
        self.next = Some(next);
    }

    async fn handle(&self, request: &mut RequestContext, client: &ClientContext) {
        if request.check_cancelled(self.name()) {
            return;
        }
        let start = Instant::now();

        if request.opts.targets.is_empty() {
            match resolve_targets(request, client).await {
                Ok(targets) => request.opts.targets = targets,
                Err(status) => {
                    request.fail(status);
                    return;
                }
            }
        } else {
            debug!(targets = ?request.opts.target_urls(), "using explicit targets");
        }

        debug!(
            step = self.name(),
            targets = ?request.opts.target_urls(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "targets resolved"
        );
        proceed(&self.next, request, client).await;
    }
}

async fn resolve_targets(
    request: &RequestContext,
    client: &ClientContext,
) -> Result<Vec<Arc<dyn Peer>>, Status> {
    let channel_id = &client.channel_id;
    let chaincode_id = &request.request.chaincode_id;

    let discovered = client
        .discovery
        .discover(channel_id)
        .await
        .map_err(|e| e.context("failed to discover peers"))?;

    let selected = client
        .selection
        .select(channel_id, chaincode_id, &discovered)
        .await
        .map_err(|e| e.context("failed to select endorsing peers"))?;

    let targets: Vec<Arc<dyn Peer>> = match &request.selection_filter {
        Some(filter) => selected
            .into_iter()
            .filter(|peer| filter.accept(peer.as_ref()))
            .collect(),
        None => selected,
    };

    if targets.is_empty() {
        return Err(Status::new(
            Group::Client,
            Code::NoPeersAvailable,
            format!("no endorsing peers available for chaincode {chaincode_id} on channel {channel_id}"),
        ));
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pcl_types::mock::MockPeer;
    use pcl_types::{Code, Peer, Status};

    use super::*;
    use crate::memory::{static_client_context, StaticDiscovery, StaticSelection};
    use crate::request::{Opts, Request};

    fn peers() -> (Arc<dyn Peer>, Arc<dyn Peer>) {
        (
            Arc::new(MockPeer::new("p1", "peer1:7051")),
            Arc::new(MockPeer::new("p2", "peer2:7051")),
        )
    }

    fn request(opts: Opts) -> RequestContext {
        RequestContext::new(Request::new("testCC", "invoke").arg("query").arg("b"), opts)
    }

    #[tokio::test]
    async fn discovered_peers_keep_their_order() {
        let (p1, p2) = peers();
        let client = static_client_context(vec![p1.clone(), p2.clone()]);
        let mut ctx = request(Opts::default());

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        assert!(ctx.error().is_none());
        assert_eq!(ctx.opts.target_urls(), vec!["peer1:7051", "peer2:7051"]);
        assert!(Arc::ptr_eq(&ctx.opts.targets[0], &p1));
        assert!(Arc::ptr_eq(&ctx.opts.targets[1], &p2));
    }

    #[tokio::test]
    async fn explicit_targets_bypass_discovery() {
        let (p1, p2) = peers();
        let discovery = Arc::new(StaticDiscovery::new(vec![p1, p2.clone()]));
        let mut client = static_client_context(vec![]);
        client.discovery = discovery.clone();
        let mut ctx = request(Opts::default().with_targets(vec![p2.clone()]));

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        assert!(ctx.error().is_none());
        assert_eq!(ctx.opts.targets.len(), 1);
        assert!(Arc::ptr_eq(&ctx.opts.targets[0], &p2));
        assert_eq!(discovery.calls(), 0);
    }

    #[tokio::test]
    async fn explicit_targets_are_not_filtered() {
        let (p1, p2) = peers();
        let opts = Opts::default()
            .with_targets(vec![p1, p2])
            .with_target_filter(|peer: &dyn Peer| peer.url() == "peer2:7051");
        let mut ctx = request(opts);

        TargetResolutionHandler::new()
            .handle(&mut ctx, &static_client_context(vec![]))
            .await;

        assert_eq!(ctx.opts.target_urls(), vec!["peer1:7051", "peer2:7051"]);
    }

    #[tokio::test]
    async fn filter_narrows_selected_peers() {
        let (p1, p2) = peers();
        let client = static_client_context(vec![p1, p2.clone()]);
        let opts = Opts::default().with_target_filter(|peer: &dyn Peer| peer.url() == "peer2:7051");
        let mut ctx = request(opts);

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        assert!(ctx.error().is_none());
        assert_eq!(ctx.opts.targets.len(), 1);
        assert!(Arc::ptr_eq(&ctx.opts.targets[0], &p2));
    }

    #[tokio::test]
    async fn selection_order_is_preserved() {
        let (p1, p2) = peers();
        let mut client = static_client_context(vec![p1.clone(), p2.clone()]);
        client.selection = Arc::new(StaticSelection::with_peers(vec![p2, p1]));
        let mut ctx = request(Opts::default());

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        assert_eq!(ctx.opts.target_urls(), vec!["peer2:7051", "peer1:7051"]);
    }

    #[tokio::test]
    async fn selection_error_message_is_preserved() {
        let mut client = static_client_context(vec![]);
        client.selection = Arc::new(StaticSelection::failing(Status::selection(
            "Selection service error",
        )));
        let mut ctx = request(Opts::default());

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        let err = ctx.error().unwrap();
        assert!(err.to_string().contains("Selection service error"));
        assert!(ctx.opts.targets.is_empty());
    }

    #[tokio::test]
    async fn discovery_error_message_is_preserved() {
        let mut client = static_client_context(vec![]);
        client.discovery = Arc::new(StaticDiscovery::failing(Status::discovery(
            "Selection service error",
        )));
        let mut ctx = request(Opts::default());

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        let err = ctx.error().unwrap();
        assert!(err.message.contains("Selection service error"));
        assert!(err.message.starts_with("failed to discover peers"));
    }

    #[tokio::test]
    async fn empty_resolution_is_an_error() {
        let (p1, _) = peers();
        let client = static_client_context(vec![p1]);
        let opts = Opts::default().with_target_filter(|_: &dyn Peer| false);
        let mut ctx = request(opts);

        TargetResolutionHandler::new().handle(&mut ctx, &client).await;

        assert_eq!(ctx.error().unwrap().code, Code::NoPeersAvailable);
    }
}
