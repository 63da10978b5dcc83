// biostream — Inbound Topic Router
//
// Static table from topic string to handler, built once at startup.  Topics
// are matched exactly and case-sensitively; anything else on the broker is
// background noise and is dropped.

use crate::events::InboundFragment;

pub trait MessageHandler: Send {
    fn handle(&mut self, fragment: &InboundFragment<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Dispatched,
    Unhandled,
}

#[derive(Default)]
pub struct TopicRouter {
    routes: Vec<(String, Box<dyn MessageHandler>)>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. A later registration for the same
    /// topic replaces the earlier one.
    pub fn with_route(mut self, topic: impl Into<String>, handler: impl MessageHandler + 'static) -> Self {
        let topic = topic.into();
        self.routes.retain(|(t, _)| *t != topic);
        self.routes.push((topic, Box::new(handler)));
        self
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(t, _)| t.as_str())
    }

    pub fn route(&mut self, fragment: &InboundFragment<'_>) -> RouteOutcome {
        match self.routes.iter_mut().find(|(t, _)| t == fragment.topic) {
            Some((_, handler)) => {
                handler.handle(fragment);
                RouteOutcome::Dispatched
            }
            None => {
                log::debug!("No route for topic '{}' ({} bytes dropped)", fragment.topic, fragment.payload.len());
                RouteOutcome::Unhandled
            }
        }
    }
}
