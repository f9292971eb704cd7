//! Shutdown-aware tracing setup.
//!
//! During a graceful shutdown, buffered stdout writes can be lost if the
//! process exits before the buffer flushes. This writer switches to
//! unbuffered direct writes once shutdown has started.

use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
};

use once_cell::sync::Lazy;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{
        format::{Format, Writer},
        MakeWriter,
    },
    EnvFilter,
};

static SHUTDOWN_IN_PROGRESS: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

struct ShutdownAwareWriter {
    buffer: std::io::BufWriter<std::io::Stdout>,
}

impl ShutdownAwareWriter {
    fn new() -> Self {
        Self { buffer: std::io::BufWriter::new(std::io::stdout()) }
    }
}

impl Write for ShutdownAwareWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if SHUTDOWN_IN_PROGRESS.load(Ordering::Relaxed) {
            std::io::stdout().lock().write(buf)
        } else {
            self.buffer.write(buf)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if SHUTDOWN_IN_PROGRESS.load(Ordering::Relaxed) {
            std::io::stdout().lock().flush()
        } else {
            self.buffer.flush()
        }
    }
}

struct ShutdownAwareWriterMaker;

impl<'a> MakeWriter<'a> for ShutdownAwareWriterMaker {
    type Writer = ShutdownAwareWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ShutdownAwareWriter::new()
    }
}

struct CustomTimer;

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        if SHUTDOWN_IN_PROGRESS.load(Ordering::Relaxed) {
            write!(writer, "{}", now.format("%H:%M:%S"))
        } else {
            write!(writer, "{} - {}", now.format("%d %B"), now.format("%H:%M:%S%.6f"))
        }
    }
}

pub fn setup_logger(log_level: LevelFilter) {
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());
    let format = Format::default().with_timer(CustomTimer).with_level(true).with_target(true);

    let subscriber = tracing_subscriber::fmt()
        .with_writer(ShutdownAwareWriterMaker)
        .with_env_filter(filter)
        .event_format(format)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        println!("Logger has already been set up, continuing...");
    }
}

pub fn setup_info_logger() {
    setup_logger(LevelFilter::INFO);
}

/// Call this when a graceful shutdown begins so in-flight log lines flush.
pub fn mark_shutdown_started() {
    SHUTDOWN_IN_PROGRESS.store(true, Ordering::Relaxed);
}
