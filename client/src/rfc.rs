//! Remote function calls resolved against views bound to entities
//!
//! Each view type owns a registry of named handlers. Names are checked when
//! registered, so a call can only fail because the remote side named a
//! function the view does not have.

use log::debug;
use serde_json::Value;
use shared::protocol::RfcMessage;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RfcError {
    #[error("remote function name must not be empty")]
    EmptyName,
    #[error("remote function `{0}` is already registered")]
    Duplicate(String),
    #[error("entity {entity_id} has no remote function `{function}`")]
    UnknownFunction { entity_id: String, function: String },
    #[error("bad parameters for `{function}`: {reason}")]
    BadParams { function: String, reason: String },
}

pub type RfcHandler<V> = Box<dyn Fn(&mut V, &[Value]) -> Result<(), RfcError> + Send + Sync>;

/// Named handlers for one view type
pub struct RfcRegistry<V> {
    handlers: HashMap<String, RfcHandler<V>>,
}

impl<V> Default for RfcRegistry<V> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<V> RfcRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<(), RfcError>
    where
        F: Fn(&mut V, &[Value]) -> Result<(), RfcError> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(RfcError::EmptyName);
        }
        if self.handlers.contains_key(name) {
            return Err(RfcError::Duplicate(name.to_string()));
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Runs `function` on `view`; `None` when no such function is registered
    pub fn invoke(&self, view: &mut V, function: &str, params: &[Value]) -> Option<Result<(), RfcError>> {
        self.handlers
            .get(function)
            .map(|handler| handler(view, params))
    }
}

/// A view that remote calls can be resolved against
pub trait RemoteCallable: Send {
    /// Returns `Ok(false)` when the view has no function by that name
    fn call(&mut self, function: &str, params: &[Value]) -> Result<bool, RfcError>;
}

/// A view value paired with its type's registry
pub struct BoundView<V> {
    pub view: V,
    registry: Arc<RfcRegistry<V>>,
}

impl<V> BoundView<V> {
    pub fn new(view: V, registry: Arc<RfcRegistry<V>>) -> Self {
        Self { view, registry }
    }
}

impl<V: Send> RemoteCallable for BoundView<V> {
    fn call(&mut self, function: &str, params: &[Value]) -> Result<bool, RfcError> {
        match self.registry.invoke(&mut self.view, function, params) {
            Some(result) => result.map(|_| true),
            None => Ok(false),
        }
    }
}

/// Routes `onRFC` envelopes to the view bound to their entity
#[derive(Default)]
pub struct RfcDispatcher {
    views: HashMap<String, Box<dyn RemoteCallable>>,
}

impl RfcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, entity_id: &str, view: Box<dyn RemoteCallable>) {
        self.views.insert(entity_id.to_string(), view);
    }

    pub fn unbind(&mut self, entity_id: &str) -> bool {
        self.views.remove(entity_id).is_some()
    }

    pub fn is_bound(&self, entity_id: &str) -> bool {
        self.views.contains_key(entity_id)
    }

    pub fn clear(&mut self) {
        self.views.clear();
    }

    /// Invokes the envelope's function. `Ok(false)` means no view is bound to
    /// the entity and the envelope was ignored.
    pub fn dispatch(&mut self, message: &RfcMessage) -> Result<bool, RfcError> {
        let Some(view) = self.views.get_mut(&message.entity_id) else {
            debug!("No view bound for RFC target {}", message.entity_id);
            return Ok(false);
        };

        if view.call(&message.function, &message.param)? {
            Ok(true)
        } else {
            Err(RfcError::UnknownFunction {
                entity_id: message.entity_id.clone(),
                function: message.function.clone(),
            })
        }
    }
}

/// Reads a string parameter
pub fn param_str<'a>(function: &str, params: &'a [Value], index: usize) -> Result<&'a str, RfcError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| RfcError::BadParams {
            function: function.to_string(),
            reason: format!("expected a string at {}", index),
        })
}

/// Reads a numeric parameter, accepting numeric strings
pub fn param_f64(function: &str, params: &[Value], index: usize) -> Result<f64, RfcError> {
    params
        .get(index)
        .and_then(shared::model::value_as_f64)
        .ok_or_else(|| RfcError::BadParams {
            function: function.to_string(),
            reason: format!("expected a number at {}", index),
        })
}
