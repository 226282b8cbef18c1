use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use submariner_crds::v1::{Cluster, Endpoint};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// The merged event stream of the route agent. A single consumer applies
/// these in arrival order, which sequences all state transitions.
#[derive(Clone, Debug)]
pub(crate) enum RouteEvent {
    ClusterApplied(Cluster),
    ClusterDeleted(Cluster),
    EndpointApplied(Endpoint),
    EndpointDeleted(Endpoint),
    PodApplied(Pod),
    PodDeleted(Pod),
}

impl RouteEvent {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            RouteEvent::ClusterApplied(_) | RouteEvent::ClusterDeleted(_) => "cluster",
            RouteEvent::EndpointApplied(_) | RouteEvent::EndpointDeleted(_) => "endpoint",
            RouteEvent::PodApplied(_) | RouteEvent::PodDeleted(_) => "pod",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct QueuedEvent {
    pub event: RouteEvent,
    pub attempt: u32,
}

impl QueuedEvent {
    pub(crate) fn new(event: RouteEvent) -> Self {
        Self { event, attempt: 0 }
    }

    pub(crate) fn retry(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// Maps a raw watch event to queued route events. Initial-list entries are
/// treated like applies so a (re)connecting watch replays the inventory.
pub(crate) fn map_watch_event<K, A, D>(
    event: watcher::Event<K>,
    applied: A,
    deleted: D,
) -> Vec<QueuedEvent>
where
    A: Fn(K) -> RouteEvent,
    D: Fn(K) -> RouteEvent,
{
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
            vec![QueuedEvent::new(applied(obj))]
        }
        watcher::Event::Delete(obj) => vec![QueuedEvent::new(deleted(obj))],
        watcher::Event::Init | watcher::Event::InitDone => Vec::new(),
    }
}

/// Exponential backoff for re-enqueued events, capped so a persistently
/// failing handler retries every `BACKOFF_MAX`.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt.min(8)))
        .min(BACKOFF_MAX)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(30));
        assert_eq!(backoff_delay(64), Duration::from_secs(30));
    }

    #[test]
    fn test_map_watch_event_variants() {
        let cluster = Cluster::default();

        let applied = map_watch_event(
            watcher::Event::Apply(cluster.clone()),
            RouteEvent::ClusterApplied,
            RouteEvent::ClusterDeleted,
        );
        assert_eq!(applied.len(), 1);
        assert!(matches!(applied[0].event, RouteEvent::ClusterApplied(_)));
        assert_eq!(applied[0].attempt, 0);

        let deleted = map_watch_event(
            watcher::Event::Delete(cluster.clone()),
            RouteEvent::ClusterApplied,
            RouteEvent::ClusterDeleted,
        );
        assert!(matches!(deleted[0].event, RouteEvent::ClusterDeleted(_)));

        let markers = map_watch_event(
            watcher::Event::<Cluster>::Init,
            RouteEvent::ClusterApplied,
            RouteEvent::ClusterDeleted,
        );
        assert!(markers.is_empty());
    }
}
