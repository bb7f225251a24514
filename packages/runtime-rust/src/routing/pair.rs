//! Fan-out units: one route paired with the message it receives.

use std::fmt;
use std::sync::Arc;

use gather_core::{merge_variables, GroupCorrelation, Message, Payload, Value};

use super::route::Route;

/// One (route, message) execution unit of a fan-out.
///
/// `sequence` is the pair's position and the merge key for its result.
#[derive(Clone)]
pub struct RoutingPair {
    pub sequence: usize,
    pub route: Arc<dyn Route>,
    pub message: Message,
}

impl fmt::Debug for RoutingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingPair")
            .field("sequence", &self.sequence)
            .field("route", &self.route.name())
            .field("message", &self.message.id)
            .finish()
    }
}

impl RoutingPair {
    /// One pair per route, each receiving a copy of `message`.
    #[must_use]
    pub fn for_routes(message: &Message, routes: &[Arc<dyn Route>]) -> Vec<Self> {
        let group_size = routes.len();
        routes
            .iter()
            .enumerate()
            .map(|(sequence, route)| Self {
                sequence,
                route: Arc::clone(route),
                message: stamp(message.clone(), sequence, group_size),
            })
            .collect()
    }

    /// One pair per element of the payload, all sent to `route`.
    ///
    /// A `Payload::Messages` list yields its messages (correlated to the
    /// parent, parent variables underneath their own); a `Value::Array`
    /// yields one derived message per element. Any other payload is a
    /// single pair carrying `message` itself.
    #[must_use]
    pub fn split(route: &Arc<dyn Route>, message: &Message) -> Vec<Self> {
        let parts: Vec<Message> = match &message.payload {
            Payload::Messages(children) => children
                .iter()
                .map(|child| {
                    let mut part = child.clone();
                    part.correlation_id.clone_from(&message.correlation_id);
                    let mut variables = message.variables.clone();
                    merge_variables(&mut variables, [&child.variables]);
                    part.variables = variables;
                    part
                })
                .collect(),
            Payload::Value(Value::Array(items)) => items
                .iter()
                .map(|item| message.derive(item.clone()))
                .collect(),
            _ => vec![message.clone()],
        };

        let group_size = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(sequence, part)| Self {
                sequence,
                route: Arc::clone(route),
                message: stamp(part, sequence, group_size),
            })
            .collect()
    }
}

fn stamp(message: Message, sequence: usize, group_size: usize) -> Message {
    message.with_group_correlation(GroupCorrelation {
        sequence,
        group_size: Some(group_size),
    })
}
