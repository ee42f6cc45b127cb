//! Method registry (§4.H "Method registry", §9 "Dynamic dispatch over
//! method names" — an explicit table, not runtime reflection).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::auth::{Principal, Role};
use crate::error::Result;
use crate::rpc::context::RpcContext;

pub type HandlerResult = Result<Value>;
pub type HandlerFn = Arc<dyn Fn(Arc<RpcContext>, Option<Principal>, Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// One registered method: name, handler, minimum role (`None` means no
/// authentication required, used only by `authenticate` itself), version.
#[derive(Clone)]
pub struct MethodEntry {
    pub name: &'static str,
    pub min_role: Option<Role>,
    pub version: &'static str,
    pub handler: HandlerFn,
}

#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<&'static str, MethodEntry>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, min_role: Option<Role>, version: &'static str, handler: HandlerFn) {
        self.methods.insert(
            name,
            MethodEntry {
                name,
                min_role,
                version,
                handler,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.get(name)
    }
}

/// Convenience macro-free helper for registering an async fn pointer as a
/// handler without writing out the boxed-future boilerplate at each call site.
#[macro_export]
macro_rules! rpc_handler {
    ($f:expr) => {
        ::std::sync::Arc::new(move |ctx, principal, params| ::std::boxed::Box::pin($f(ctx, principal, params)))
    };
}
