//! Host-registered proxy types.
//!
//! A pickle stream may reference types by `(module, name)`.  Nothing is
//! ever imported or called based on stream contents alone: only pairs the
//! host has registered here can be materialized, and everything else is
//! rejected.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::result::Result as StdResult;

use tracing::debug;

use crate::error::{Error, ErrorCode, Result};
use crate::value::Value;

/// An instance produced by a registered factory.
///
/// `as_any` lets the host downcast decoded objects back to its concrete
/// type after deserialization.
pub trait ProxyObject: fmt::Debug {
    /// Applies pickled state to the instance (the BUILD opcode).
    fn set_state(&mut self, state: Value) -> StdResult<(), String> {
        let _ = state;
        Err("object does not accept state".into())
    }

    fn as_any(&self) -> &dyn Any;
}

/// Factory callback producing an instance from positional arguments.
pub type Factory = Box<dyn Fn(Vec<Value>) -> StdResult<Box<dyn ProxyObject>, String>>;

/// A registered type: its key and the factory that builds instances.
pub struct ProxyClass {
    module: String,
    name: String,
    factory: Factory,
}

impl ProxyClass {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds an instance from positional arguments.
    ///
    /// An empty argument list and a single empty tuple both mean
    /// zero-argument construction.
    pub fn construct(&self, mut args: Vec<Value>) -> StdResult<Box<dyn ProxyObject>, String> {
        if args.len() == 1 {
            if let Value::Tuple(items) = &args[0] {
                if items.is_empty() {
                    args.clear();
                }
            }
        }
        (self.factory)(args)
    }
}

impl fmt::Debug for ProxyClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProxyClass")
            .field("module", &self.module)
            .field("name", &self.name)
            .finish()
    }
}

/// Mapping from `(module, name)` pairs to factories.
#[derive(Default)]
pub struct ProxyRegistry {
    modules: HashMap<String, HashMap<String, Rc<ProxyClass>>>,
}

impl ProxyRegistry {
    pub fn new() -> ProxyRegistry {
        ProxyRegistry::default()
    }

    /// Registers a factory for `(module, name)`.  Registering the same
    /// pair twice is an error.
    pub fn register<F>(&mut self, module: &str, name: &str, factory: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> StdResult<Box<dyn ProxyObject>, String> + 'static,
    {
        let entries = self.modules.entry(module.to_owned()).or_default();
        if entries.contains_key(name) {
            return Err(Error::Syntax(ErrorCode::DuplicateProxy(
                module.to_owned(),
                name.to_owned(),
            )));
        }
        debug!(module, name, "registered proxy");
        entries.insert(
            name.to_owned(),
            Rc::new(ProxyClass {
                module: module.to_owned(),
                name: name.to_owned(),
                factory: Box::new(factory),
            }),
        );
        Ok(())
    }

    /// Looks up a registered type.
    pub fn lookup(&self, module: &str, name: &str) -> Option<Rc<ProxyClass>> {
        self.modules.get(module).and_then(|entries| entries.get(name)).cloned()
    }
}
