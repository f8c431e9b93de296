//! Containment of panics raised while a request is being handled.
//!
//! [`PanicGuard`] polls the downstream chain inside [`std::panic::catch_unwind`].
//! A panic hook, installed once per process, resolves the call site of panics
//! raised under a guard and parks it in a thread-local slot; the guard, still on
//! the same thread, picks it up and turns the panic into a [`Fault`]. Panics
//! raised outside any guard are forwarded to the previously installed hook.
use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    cell::{Cell, RefCell},
    future::Future,
    panic::{self, AssertUnwindSafe, PanicHookInfo},
    pin::Pin,
    sync::Once,
    task::{Context, Poll},
};

/// Site reported when nothing at all could be resolved.
pub const UNRESOLVED_SITE: &str = "pc:0x0";

/// A panic converted into an ordinary error value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panic recovered at {site}: {message}")]
pub struct Fault {
    /// `function:line`, `file:line` or `pc:<hex>`
    pub site: String,
    pub message: String,
}

impl Fault {
    fn from_payload(payload: Box<dyn Any + Send>, site: Option<String>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            site: site.unwrap_or_else(|| UNRESOLVED_SITE.to_string()),
            message,
        }
    }
}

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED_SITE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Install the call-site capturing panic hook. Idempotent.
pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if GUARD_DEPTH.with(Cell::get) > 0 {
                let site = resolve_call_site(info);
                CAPTURED_SITE.with(|slot| *slot.borrow_mut() = Some(site));
            } else {
                previous(info);
            }
        }));
    });
}

/// Future adapter that turns a panic of `F` into `Err(Fault)`.
pub struct PanicGuard<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> PanicGuard<F> {
    pub fn new(inner: F) -> Self {
        install_panic_hook();
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for PanicGuard<F> {
    type Output = Result<F::Output, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        let depth = DepthGuard::enter();
        let polled = panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx)));
        drop(depth);

        match polled {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Err(payload) => {
                let site = CAPTURED_SITE.with(|slot| slot.borrow_mut().take());
                Poll::Ready(Err(Fault::from_payload(payload, site)))
            }
        }
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// ── Call-site resolution ──────────────────────────────────────────────────────

/// One frame of a rendered backtrace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub symbol: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub address: Option<String>,
}

/// Symbols belonging to the unwinding machinery rather than to the code that panicked.
const RUNTIME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "<std::",
    "<core::",
    "<alloc::",
    "backtrace::",
    "rust_begin_unwind",
    "rust_panic",
    "__rust",
];

/// The hook closure and the resolver itself sit directly above the panic machinery.
const HOOK_FRAMES: &[&str] = &[
    concat!(module_path!(), "::resolve_call_site"),
    concat!(module_path!(), "::install_panic_hook"),
];

fn is_runtime_frame(symbol: &str) -> bool {
    RUNTIME_PREFIXES
        .iter()
        .chain(HOOK_FRAMES)
        .any(|prefix| symbol.starts_with(prefix))
}

fn resolve_call_site(info: &PanicHookInfo<'_>) -> String {
    let backtrace = Backtrace::force_capture();
    let frames = match backtrace.status() {
        BacktraceStatus::Captured => parse_frames(&backtrace.to_string()),
        _ => Vec::new(),
    };
    let location = info
        .location()
        .map(|location| format!("{}:{}", location.file(), location.line()));
    select_call_site(&frames, location)
}

/// `function:line` of the first non-runtime frame, else `file:line` (from the
/// frames, then from the panic location), else the first raw frame address.
pub fn select_call_site(frames: &[Frame], location: Option<String>) -> String {
    let user_frames = || {
        frames
            .iter()
            .filter(|f| f.symbol.as_deref().is_none_or(|s| !is_runtime_frame(s)))
    };

    if let Some((symbol, line)) =
        user_frames().find_map(|f| Some((f.symbol.as_deref()?, f.line?)))
    {
        return format!("{symbol}:{line}");
    }
    if let Some((file, line)) = user_frames().find_map(|f| Some((f.file.as_deref()?, f.line?))) {
        return format!("{file}:{line}");
    }
    if let Some(location) = location {
        return location;
    }
    frames
        .iter()
        .find_map(|f| f.address.as_deref())
        .map(|address| format!("pc:{address}"))
        .unwrap_or_else(|| UNRESOLVED_SITE.to_string())
}

/// Parse the `Display` rendering of a captured [`Backtrace`].
///
/// Frames look like `  4: crate::module::function` followed by an optional
/// `at path/to/file.rs:LINE:COL` line; inlined symbols repeat without an index.
pub fn parse_frames(rendered: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();

    for line in rendered.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let (file, line_no) = split_location(location);
                frame.file = Some(file.to_string());
                frame.line = line_no;
            }
            continue;
        }

        let symbol = match line.split_once(": ") {
            Some((index, rest)) if index.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => line,
        };
        frames.push(frame_for_symbol(symbol));
    }

    frames
}

fn frame_for_symbol(symbol: &str) -> Frame {
    if symbol.starts_with("0x") {
        return Frame {
            address: Some(symbol.to_string()),
            ..Frame::default()
        };
    }
    if symbol == "<unknown>" {
        return Frame::default();
    }
    Frame {
        symbol: Some(strip_hash(symbol).to_string()),
        ..Frame::default()
    }
}

/// `path:line:col` (or `path:line`) into the path and line number.
fn split_location(location: &str) -> (&str, Option<u32>) {
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    let mut path = location;
    let mut numbers = Vec::with_capacity(2);
    while numbers.len() < 2 {
        match path.rsplit_once(':') {
            Some((head, n)) if numeric(n) => {
                numbers.push(n);
                path = head;
            }
            _ => break,
        }
    }

    match numbers.as_slice() {
        // [col, line] or [line]
        [_, line] | [line] => (path, line.parse().ok()),
        _ => (location, None),
    }
}

/// Drop a trailing `::h0123456789abcdef` symbol hash.
fn strip_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::") {
        Some((head, hash))
            if hash.len() == 17
                && hash.starts_with('h')
                && hash[1..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            head
        }
        _ => symbol,
    }
}
