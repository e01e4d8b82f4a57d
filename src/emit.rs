//! Hand-off of merged fields to a log emitter.
//!
//! Per-call fields are layered over the context fields with the same merge
//! used for injection, then passed to an [`Emitter`]. A [`Logger`] pairs an
//! emitter with a level and can be bound to a [`Context`]; the free functions
//! here log through the logger bound nearest to the given context, or through
//! [`TracingEmitter`] when none is bound. Formatting and output stay with the
//! installed `tracing` subscriber.
//!
//! There is no fatal level: ending the process is left to the caller.

use std::error::Error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use tracing::Level;

use crate::config::caller_enabled;
use crate::context::Context;
use crate::fields::Fields;

/// Receiver of merged field sets, one call per log line.
pub trait Emitter: Send + Sync {
    fn emit(&self, level: Level, msg: &str, fields: &Fields);
}

/// Records events through the `tracing` facade.
///
/// The fields go out as a single `fields` attribute holding a JSON object in
/// storage order. Duplicate keys are written as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl Emitter for TracingEmitter {
    fn emit(&self, level: Level, msg: &str, fields: &Fields) {
        let rendered = serde_json::to_string(fields).unwrap_or_else(|_| fields.to_string());
        if level == Level::ERROR {
            tracing::event!(Level::ERROR, fields = %rendered, "{msg}");
        } else if level == Level::WARN {
            tracing::event!(Level::WARN, fields = %rendered, "{msg}");
        } else if level == Level::INFO {
            tracing::event!(Level::INFO, fields = %rendered, "{msg}");
        } else if level == Level::DEBUG {
            tracing::event!(Level::DEBUG, fields = %rendered, "{msg}");
        } else {
            tracing::event!(Level::TRACE, fields = %rendered, "{msg}");
        }
    }
}

/// An emitter and the most verbose level it passes on.
#[derive(Clone)]
pub struct Logger {
    emitter: Arc<dyn Emitter>,
    level: Level,
}

impl Default for Logger {
    /// `tracing` output at every level; the subscriber decides what is kept.
    fn default() -> Self {
        Self::new(TracingEmitter, Level::TRACE)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}

impl Logger {
    pub fn new(emitter: impl Emitter + 'static, level: Level) -> Self {
        Self::from_arc(Arc::new(emitter), level)
    }

    pub fn from_arc(emitter: Arc<dyn Emitter>, level: Level) -> Self {
        Self { emitter, level }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Same emitter, different level.
    pub fn with_level(&self, level: Level) -> Self {
        Self {
            emitter: Arc::clone(&self.emitter),
            level,
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        // tracing orders more verbose levels higher
        level <= self.level
    }

    /// Derives a context carrying this logger.
    pub fn to_context(&self, ctx: &Context) -> Context {
        ctx.with_value(self.clone())
    }

    /// Logger bound nearest to `ctx`, or the default logger.
    pub fn from_context(ctx: &Context) -> Self {
        ctx.value::<Logger>().cloned().unwrap_or_default()
    }

    #[track_caller]
    pub fn log(&self, level: Level, ctx: &Context, msg: &str, extra: &Fields) {
        if self.enabled(level) {
            self.dispatch(level, ctx, msg, extra, Location::caller());
        }
    }

    #[track_caller]
    pub fn trace(&self, ctx: &Context, msg: &str, extra: &Fields) {
        self.log(Level::TRACE, ctx, msg, extra);
    }

    #[track_caller]
    pub fn debug(&self, ctx: &Context, msg: &str, extra: &Fields) {
        self.log(Level::DEBUG, ctx, msg, extra);
    }

    #[track_caller]
    pub fn info(&self, ctx: &Context, msg: &str, extra: &Fields) {
        self.log(Level::INFO, ctx, msg, extra);
    }

    #[track_caller]
    pub fn warn(&self, ctx: &Context, msg: &str, extra: &Fields) {
        self.log(Level::WARN, ctx, msg, extra);
    }

    /// Error-level line with the error's text attached as `error`.
    #[track_caller]
    pub fn error(&self, ctx: &Context, err: &dyn Error, msg: &str, extra: &Fields) {
        if !self.enabled(Level::ERROR) {
            return;
        }
        let mut with_error = Fields::new();
        with_error.push("error", err.to_string());
        self.dispatch(
            Level::ERROR,
            ctx,
            msg,
            &extra.with(&with_error),
            Location::caller(),
        );
    }

    /// Info-level line emitted whatever this logger's level is.
    #[track_caller]
    pub fn force(&self, ctx: &Context, msg: &str, extra: &Fields) {
        self.dispatch(Level::INFO, ctx, msg, extra, Location::caller());
    }

    fn dispatch(
        &self,
        level: Level,
        ctx: &Context,
        msg: &str,
        extra: &Fields,
        location: &Location<'_>,
    ) {
        let mut fields = merged_fields(ctx, extra);
        if caller_enabled() {
            let mut caller = Fields::new();
            caller.push("caller", format!("{}:{}", location.file(), location.line()));
            fields = fields.with(&caller);
        }
        self.emitter.emit(level, msg, &fields);
    }
}

/// Context fields with `extra` layered on top.
pub fn merged_fields(ctx: &Context, extra: &Fields) -> Fields {
    ctx.fields().with(extra)
}

#[track_caller]
pub fn emit(level: Level, ctx: &Context, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).log(level, ctx, msg, extra);
}

#[track_caller]
pub fn trace(ctx: &Context, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).trace(ctx, msg, extra);
}

#[track_caller]
pub fn debug(ctx: &Context, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).debug(ctx, msg, extra);
}

#[track_caller]
pub fn info(ctx: &Context, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).info(ctx, msg, extra);
}

#[track_caller]
pub fn warn(ctx: &Context, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).warn(ctx, msg, extra);
}

#[track_caller]
pub fn error(ctx: &Context, err: &dyn Error, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).error(ctx, err, msg, extra);
}

#[track_caller]
pub fn force(ctx: &Context, msg: &str, extra: &Fields) {
    Logger::from_context(ctx).force(ctx, msg, extra);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fields, set_caller_enabled, set_deduplication_enabled};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serial_test::serial;
    use std::io;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(Level, String, Fields)>>);

    impl Recording {
        fn events(&self) -> Vec<(Level, String, Fields)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Emitter for Recording {
        fn emit(&self, level: Level, msg: &str, fields: &Fields) {
            self.0
                .lock()
                .unwrap()
                .push((level, msg.to_string(), fields.clone()));
        }
    }

    fn recording_logger(level: Level) -> (Arc<Recording>, Logger) {
        let recording = Arc::new(Recording::default());
        let logger = Logger::from_arc(recording.clone(), level);
        (recording, logger)
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    #[serial]
    fn call_fields_override_context_fields() {
        set_deduplication_enabled(true);
        let (recording, logger) = recording_logger(Level::TRACE);
        let ctx = Context::background().inject(fields! { "user" => "ann", "attempt" => 1 });
        logger.warn(&ctx, "retrying", &fields! { "attempt" => 2 });
        set_deduplication_enabled(false);

        let events = recording.events();
        assert_eq!(events.len(), 1);
        let (level, msg, merged) = &events[0];
        assert_eq!(*level, Level::WARN);
        assert_eq!(msg, "retrying");
        assert_eq!(merged, &fields! { "attempt" => 2, "user" => "ann" });
    }

    #[test]
    fn empty_extra_passes_context_fields_through() {
        let ctx = Context::background().inject(fields! { "a" => 1 });
        let merged = merged_fields(&ctx, &Fields::new());
        assert!(merged.ptr_eq(&ctx.fields()));
    }

    #[test]
    #[serial]
    fn free_functions_use_logger_bound_to_context() {
        let (recording, logger) = recording_logger(Level::DEBUG);
        let ctx = logger
            .to_context(&Context::background())
            .inject(fields! { "request" => "r-7" });

        info(&ctx, "handled", &Fields::new());
        trace(&ctx, "too verbose", &Fields::new());

        let events = recording.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "handled");
        assert_eq!(events[0].2, fields! { "request" => "r-7" });
        assert_eq!(Logger::from_context(&ctx).level(), Level::DEBUG);
    }

    #[test]
    fn unbound_context_gets_default_logger() {
        let logger = Logger::from_context(&Context::background());
        assert_eq!(logger.level(), Level::TRACE);
        assert!(logger.enabled(Level::TRACE));
    }

    #[test]
    #[serial]
    fn level_filters_but_force_passes() {
        let (recording, logger) = recording_logger(Level::WARN);
        let ctx = logger.to_context(&Context::background());

        info(&ctx, "dropped", &Fields::new());
        warn(&ctx, "kept", &Fields::new());
        force(&ctx, "forced", &fields! { "why" => "audit" });

        let events = recording.events();
        let messages: Vec<_> = events.iter().map(|(_, msg, _)| msg.as_str()).collect();
        assert_eq!(messages, vec!["kept", "forced"]);
        assert_eq!(events[1].0, Level::INFO);
        assert_eq!(events[1].2.get("why"), Some(&json!("audit")));
    }

    #[test]
    fn with_level_keeps_emitter() {
        let (recording, logger) = recording_logger(Level::ERROR);
        logger
            .with_level(Level::INFO)
            .info(&Context::background(), "now visible", &Fields::new());
        assert_eq!(recording.events().len(), 1);
    }

    #[test]
    #[serial]
    fn caller_field_points_at_call_site() {
        let (recording, logger) = recording_logger(Level::TRACE);
        let ctx = logger.to_context(&Context::background());

        set_caller_enabled(true);
        let line = line!() + 1;
        info(&ctx, "located", &Fields::new());
        set_caller_enabled(false);
        info(&ctx, "unlocated", &Fields::new());

        let events = recording.events();
        assert_eq!(
            events[0].2.get("caller"),
            Some(&json!(format!("{}:{}", file!(), line)))
        );
        assert_eq!(events[1].2.get("caller"), None);
    }

    #[test]
    #[serial]
    fn tracing_event_carries_fields() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .finish();

        let ctx = Context::background().inject(fields! { "qey" => 42 });
        tracing::subscriber::with_default(subscriber, || {
            info(&ctx, "hello", &fields! { "str" => "x" });
            debug(&ctx, "filtered out", &Fields::new());
        });

        let out = captured.contents();
        assert!(out.contains("hello"), "{out}");
        assert!(out.contains(r#"fields={"str":"x","qey":42}"#), "{out}");
        assert!(!out.contains("filtered out"), "{out}");
    }

    #[test]
    #[serial]
    fn error_attaches_error_text() {
        let (recording, logger) = recording_logger(Level::ERROR);
        let err = io::Error::new(io::ErrorKind::Other, "disk full");
        let ctx = logger
            .to_context(&Context::background())
            .inject(fields! { "path" => "/tmp/out" });
        error(&ctx, &err, "write failed", &fields! { "bytes" => 10 });

        let events = recording.events();
        let (level, _, merged) = &events[0];
        assert_eq!(*level, Level::ERROR);
        assert_eq!(merged.get("error"), Some(&json!("disk full")));
        assert_eq!(merged.get("bytes"), Some(&json!(10)));
        assert_eq!(merged.get("path"), Some(&json!("/tmp/out")));
    }
}
