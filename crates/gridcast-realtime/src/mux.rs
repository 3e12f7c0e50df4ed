use crate::error::SubscriptionError;
use crate::handler::SubscriptionSpec;
use gridcast_core::protocol::{ErrorPayload, ServerFrame};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Caller-facing handle for a registered subscription. Stable across
/// reconnects, unlike the wire correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(pub(crate) u64);

impl SubscriptionKey {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Route {
    key: SubscriptionKey,
    spec: SubscriptionSpec,
    acked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Acked,
    Failed,
    /// Server ended the stream; the caller should forget the subscription.
    Completed(SubscriptionKey),
    Unknown,
    NotRouted,
}

/// Correlation id -> handler routing for one live connection.
#[derive(Default)]
pub struct Multiplexer {
    routes: HashMap<String, Route>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a spec under a fresh correlation id and return that id.
    pub fn register(&mut self, key: SubscriptionKey, spec: SubscriptionSpec) -> String {
        let id = Uuid::new_v4().to_string();
        self.routes.insert(
            id.clone(),
            Route {
                key,
                spec,
                acked: false,
            },
        );
        id
    }

    pub fn unregister_key(&mut self, key: SubscriptionKey) -> Option<String> {
        let id = self.correlation_id(key)?;
        self.routes.remove(&id);
        Some(id)
    }

    pub fn correlation_id(&self, key: SubscriptionKey) -> Option<String> {
        self.routes
            .iter()
            .find(|(_, route)| route.key == key)
            .map(|(id, _)| id.clone())
    }

    pub fn correlation_ids(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn is_acked(&self, id: &str) -> bool {
        self.routes.get(id).map(|route| route.acked).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn dispatch(&mut self, frame: &ServerFrame) -> Dispatch {
        match frame {
            ServerFrame::StartAck { id } => match self.routes.get_mut(id) {
                Some(route) => {
                    route.acked = true;
                    Dispatch::Acked
                }
                None => unknown(id, frame),
            },
            ServerFrame::Data { id, payload } => match self.routes.get(id) {
                Some(route) => {
                    let item = match route.spec.path.as_deref() {
                        Some(path) => extract_path(payload, path),
                        None => payload.clone(),
                    };
                    route.spec.handler.next(item);
                    Dispatch::Delivered
                }
                None => unknown(id, frame),
            },
            ServerFrame::Error {
                id: Some(id),
                payload,
            } => match self.routes.get(id) {
                Some(route) => {
                    route.spec.handler.error(SubscriptionError::Server {
                        message: error_message(payload),
                        payload: payload.clone(),
                    });
                    Dispatch::Failed
                }
                None => unknown(id, frame),
            },
            ServerFrame::Complete { id } => match self.routes.remove(id) {
                Some(route) => {
                    route.spec.handler.complete();
                    Dispatch::Completed(route.key)
                }
                None => unknown(id, frame),
            },
            _ => Dispatch::NotRouted,
        }
    }
}

fn unknown(id: &str, frame: &ServerFrame) -> Dispatch {
    debug!(id, kind = frame.kind(), "mux_unknown_subscription");
    Dispatch::Unknown
}

fn error_message(payload: &Value) -> String {
    match serde_json::from_value::<ErrorPayload>(payload.clone()) {
        Ok(errors) if !errors.errors.is_empty() => errors.summary(),
        _ => {
            warn!("mux_unstructured_error_payload");
            payload.to_string()
        }
    }
}

/// Walk a dotted path into `payload`. Numeric segments index arrays. Any
/// missing segment yields the whole payload unchanged.
pub fn extract_path(payload: &Value, path: &str) -> Value {
    let mut current = payload;
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return payload.clone(),
        }
    }
    current.clone()
}
