//! Shared test fixtures: a mock payload and the transport that delivers it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A thread-safe mock payload to be delivered by a [`Transport`].
///
/// Clones share the bundle, so a continuation can attach to a payload
/// another stage already owns.
#[derive(Clone, Debug)]
pub struct Payload<T> {
    name: String,
    contents: T,
    bundle: Arc<Mutex<Vec<String>>>,
}

impl<T> Payload<T> {
    pub fn new(name: impl Into<String>, contents: T) -> Self {
        Self {
            name: name.into(),
            contents,
            bundle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contents(&self) -> &T {
        &self.contents
    }

    /// Attaches another payload's name to this one's bundle.
    pub fn attach(&self, label: impl Into<String>) {
        self.bundle.lock().push(label.into());
    }

    pub fn bundle(&self) -> Vec<String> {
        self.bundle.lock().clone()
    }
}

impl<T: PartialEq> PartialEq for Payload<T> {
    fn eq(&self, other: &Self) -> bool {
        // The bundle is mutable shared state; identity is name + contents.
        self.name == other.name && self.contents == other.contents
    }
}

/// Delivers payloads with a configurable amount of busywork.
#[derive(Clone, Copy, Debug)]
pub struct Transport {
    effort: u64,
}

impl Transport {
    pub fn new(effort: u64) -> Self {
        Self { effort }
    }

    /// Moves the payload through `effort` positions and returns it.
    pub fn deliver<T>(&self, payload: Payload<T>) -> Payload<T> {
        self.transport(&payload);
        payload
    }

    /// Moves the payload without returning it.
    pub fn transport<T>(&self, _payload: &Payload<T>) {
        let mut position = 0u64;
        for step in 0..self.effort {
            position = position.wrapping_add(step);
        }
        std::hint::black_box(position);
    }

    /// Delivers, then hits a mock failure.
    pub fn failing_delivery<T>(&self, payload: Payload<T>) -> Payload<T> {
        let _ = self.deliver(payload);
        panic!("Delivery Failure");
    }

    /// Holds the payload far longer than any test timeout.
    pub fn sleep<T>(&self, payload: Payload<T>) -> Payload<T> {
        std::thread::sleep(Duration::from_secs(2));
        payload
    }
}

pub fn default_string_payload() -> Payload<String> {
    Payload::new("Default", "I am the default String payload".to_string())
}

pub fn default_int_payload() -> Payload<i32> {
    Payload::new("Default", 10)
}
