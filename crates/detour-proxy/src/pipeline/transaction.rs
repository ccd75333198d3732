use crate::message::{Request, Response};
use crate::store::DataStore;
use serde_json::Value;

/// One client request/response cycle.
///
/// Hooks receive `&mut Transaction` and may rewrite the request, populate or
/// rewrite the response, and share values between phases through `store`.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    pub request: Request,
    pub response: Response,
    pub store: DataStore,
}

impl Transaction {
    pub fn new(id: u64, request: Request) -> Self {
        Self {
            id,
            request,
            response: Response::new(),
            store: DataStore::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shorthand for `store.get`.
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    /// Shorthand for `store.set`.
    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.store.set(key, value);
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }
}
