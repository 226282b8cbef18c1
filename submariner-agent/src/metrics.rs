use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub kind: &'static str,
}

pub struct Metrics {
    pub registry: Registry,
    pub route_events: Family<EventLabels, Counter>,
    pub route_event_errors: Family<EventLabels, Counter>,
    pub route_requeues: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("submariner");

        let route_events = Family::<EventLabels, Counter>::default();
        registry.register(
            "route_agent_events",
            "Events handled by the route agent",
            route_events.clone(),
        );

        let route_event_errors = Family::<EventLabels, Counter>::default();
        registry.register(
            "route_agent_event_errors",
            "Route agent handler failures",
            route_event_errors.clone(),
        );

        let route_requeues = Counter::default();
        registry.register(
            "route_agent_requeues",
            "Events re-enqueued after a handler failure",
            route_requeues.clone(),
        );

        Self {
            registry,
            route_events,
            route_event_errors,
            route_requeues,
        }
    }
}
