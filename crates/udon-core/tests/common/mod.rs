//! Shared helpers for udon-core integration tests

#![allow(dead_code)]

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use udon_bytecode::{assemble, Program};
use udon_core::vm::builtins::DEBUG_LOG_TARGET;

/// Layer that counts error events and records `Debug.Log` output
#[derive(Clone, Default)]
pub struct LogCapture {
    errors: Arc<AtomicUsize>,
    debug_log: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn debug_log(&self) -> Vec<String> {
        self.debug_log.lock().unwrap().clone()
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() == Level::ERROR {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        if metadata.target() == DEBUG_LOG_TARGET {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.debug_log.lock().unwrap().push(message);
        }
    }
}

/// Run `f` with a capturing subscriber installed on this thread
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}

/// Assemble `source`, panicking on errors
pub fn program(name: &str, source: &str) -> Rc<Program> {
    match assemble(name, source) {
        Ok(program) => Rc::new(program),
        Err(error) => panic!("{name} failed to assemble: {error}"),
    }
}
