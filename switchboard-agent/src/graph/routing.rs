//! Routing guards and control-tool interpretation.
//!
//! Pure functions over [`ConversationState`]; the executor calls them in a
//! fixed order each loop iteration: guards first, then interpretation, then
//! the counter update for the accepted decision.

use tracing::debug;

use super::settings::ExecutorSettings;
use super::state::{ConversationState, SuspendReason};
use super::template::{GraphTemplate, FINALIZE_TOOL, ROUTE_PREFIX};
use super::GraphError;
use crate::backend::ToolCall;

/// A coordinator decision accepted by the control-tools node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Route to the plugin with this route name
    Plugin(String),
    /// End the turn through the finalizer
    Finalize,
}

/// Check the hop and consecutive-route guards before acting on a decision.
pub fn check_guards(state: &ConversationState, settings: &ExecutorSettings) -> Option<SuspendReason> {
    if state.agent_hops >= settings.max_agent_hops {
        return Some(SuspendReason::HopLimit {
            hops: state.agent_hops,
            max: settings.max_agent_hops,
        });
    }

    let ctx = &state.plugin_context;
    if settings.consecutive_route_limit > 0 && ctx.consecutive_routes >= settings.consecutive_route_limit {
        return Some(SuspendReason::ConsecutiveRouteLimit {
            plugin: ctx.last_routed_plugin.clone().unwrap_or_default(),
            count: ctx.consecutive_routes,
            limit: settings.consecutive_route_limit,
        });
    }

    None
}

/// Interpret the coordinator's routing call.
///
/// No call at all is an implicit finalize.
pub fn interpret(call: Option<&ToolCall>, template: &GraphTemplate) -> Result<RoutingDecision, GraphError> {
    let Some(call) = call else {
        return Ok(RoutingDecision::Finalize);
    };

    if call.name == FINALIZE_TOOL {
        return Ok(RoutingDecision::Finalize);
    }

    match call.name.strip_prefix(ROUTE_PREFIX) {
        Some(route) if template.route(route).is_some() => Ok(RoutingDecision::Plugin(route.to_string())),
        _ => Err(GraphError::Routing(format!("unknown routing target '{}'", call.name))),
    }
}

/// Apply an accepted decision to the hop and consecutive-route counters.
pub fn apply(state: &mut ConversationState, decision: &RoutingDecision) {
    match decision {
        RoutingDecision::Plugin(route) => {
            state.agent_hops += 1;
            state.plugin_context.record_route(route);
            debug!(
                route = %route,
                hops = state.agent_hops,
                consecutive = state.plugin_context.consecutive_routes,
                "Routing to plugin"
            );
        }
        RoutingDecision::Finalize => state.plugin_context.reset(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::ResponseTone;
    use crate::plugin::{PluginMetadata, PluginRef};

    fn template() -> GraphTemplate {
        GraphTemplate::compile(
            "graph",
            "coordinator",
            &[(PluginRef::latest("math"), PluginMetadata::new("math", "math", "Arithmetic"))],
        )
        .unwrap()
    }

    fn state() -> ConversationState {
        ConversationState::new_turn("c", vec![], "hi", ResponseTone::Natural)
    }

    #[test]
    fn test_interpret() {
        let t = template();
        assert_eq!(interpret(None, &t).unwrap(), RoutingDecision::Finalize);

        let call = ToolCall::new("finalize", serde_json::json!({}));
        assert_eq!(interpret(Some(&call), &t).unwrap(), RoutingDecision::Finalize);

        let call = ToolCall::new("route_to_math", serde_json::json!({}));
        assert_eq!(interpret(Some(&call), &t).unwrap(), RoutingDecision::Plugin("math".into()));

        let call = ToolCall::new("route_to_weather", serde_json::json!({}));
        assert!(matches!(interpret(Some(&call), &t), Err(GraphError::Routing(_))));

        let call = ToolCall::new("rm_rf", serde_json::json!({}));
        assert!(matches!(interpret(Some(&call), &t), Err(GraphError::Routing(_))));
    }

    #[test]
    fn test_hops_only_increase_on_plugin_decisions() {
        let mut s = state();
        apply(&mut s, &RoutingDecision::Plugin("math".into()));
        apply(&mut s, &RoutingDecision::Finalize);
        apply(&mut s, &RoutingDecision::Plugin("math".into()));
        apply(&mut s, &RoutingDecision::Finalize);

        assert_eq!(s.agent_hops, 2);
        assert_eq!(s.plugin_context.consecutive_routes, 0);
        assert_eq!(s.plugin_context.routing_history.len(), 2);
    }

    #[test]
    fn test_hop_guard() {
        let settings = ExecutorSettings::default().with_max_agent_hops(3).with_consecutive_route_limit(0);
        let mut s = state();
        for _ in 0..3 {
            assert!(check_guards(&s, &settings).is_none());
            apply(&mut s, &RoutingDecision::Plugin("math".into()));
        }
        assert_eq!(
            check_guards(&s, &settings),
            Some(SuspendReason::HopLimit { hops: 3, max: 3 })
        );
    }

    #[test]
    fn test_consecutive_guard() {
        let settings = ExecutorSettings::default().with_max_agent_hops(25).with_consecutive_route_limit(2);
        let mut s = state();
        apply(&mut s, &RoutingDecision::Plugin("math".into()));
        assert!(check_guards(&s, &settings).is_none());
        apply(&mut s, &RoutingDecision::Plugin("math".into()));

        match check_guards(&s, &settings) {
            Some(SuspendReason::ConsecutiveRouteLimit { plugin, count, limit }) => {
                assert_eq!(plugin, "math");
                assert_eq!(count, 2);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected guard result: {:?}", other),
        }
    }

    #[test]
    fn test_zero_limit_disables_consecutive_guard() {
        let settings = ExecutorSettings::default().with_max_agent_hops(100).with_consecutive_route_limit(0);
        let mut s = state();
        for _ in 0..10 {
            apply(&mut s, &RoutingDecision::Plugin("math".into()));
        }
        assert!(check_guards(&s, &settings).is_none());
    }
}
