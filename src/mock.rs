//! Recording transport used by the unit tests.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::TransportError;
use crate::request::Request;
use crate::transport::Transport;
use crate::{AttributeId, Result};

pub fn attr(n: u128) -> AttributeId {
    AttributeId::characteristic(Uuid::from_u128(0x1000), Uuid::from_u128(n))
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    executed: Vec<Request>,
    failing: bool,
    panicking: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::new();
        mock.set_failing(true);
        mock
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.inner.lock().unwrap().panicking = panicking;
    }

    pub fn executed(&self) -> Vec<Request> {
        self.inner.lock().unwrap().executed.clone()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &Request) -> Result<()> {
        let (failing, panicking) = {
            let mut inner = self.inner.lock().unwrap();
            inner.executed.push(request.clone());
            (inner.failing, inner.panicking)
        };
        if panicking {
            panic!("simulated stack collapse");
        }
        if failing {
            return Err(TransportError::Rejected.into());
        }
        Ok(())
    }
}
