use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use tuffy::{
    render::{render_dev, render_production, Renderer},
    DebugLog, ErrorLevel, ErrorRouter, Exception, Message, Outcome, Output, Runtime, Settings,
    Tuffy,
};

fn buffer() -> (Arc<Mutex<Vec<u8>>>, Output) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let output: Output = buf.clone();
    (buf, output)
}

fn text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

fn settings(debug: bool) -> Settings {
    let mut settings = Settings::new();
    settings.configure("appName", "shop");
    settings.configure("debug", debug);
    settings
}

/// 带计数的渲染器包装，记录调用次数与收到的日志长度
fn counting(
    inner: fn(&Exception, &[Message]) -> String,
) -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Renderer) {
    let calls = Arc::new(AtomicUsize::new(0));
    let logged = Arc::new(AtomicUsize::new(0));
    let (c, l) = (Arc::clone(&calls), Arc::clone(&logged));
    let renderer: Renderer = Arc::new(move |exc: &Exception, log: &[Message]| {
        c.fetch_add(1, Ordering::SeqCst);
        l.store(log.len(), Ordering::SeqCst);
        inner(exc, log)
    });
    (calls, logged, renderer)
}

#[test]
fn test_production_shows_only_apology() {
    let (buf, output) = buffer();
    let log = DebugLog::new();
    let mut s = settings(false);
    s.configure("errorHandlerProduction", "counted");
    let runtime = Arc::new(Runtime::new());
    let router = ErrorRouter::new(log.clone(), Some(Arc::new(s)), Arc::clone(&runtime), output);
    let (calls, logged, renderer) = counting(render_production);
    router.register_renderer("counted", renderer);
    router.register_handlers();

    log.add_message(Message::new("Query", "SELECT password FROM users", vec![], 0, None));
    log.add_message(Message::new("Cache", "miss", vec![], 0, None));
    let outcome = runtime.run(|| Err(Exception::new("QueryFailed", "table users is locked")));

    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(logged.load(Ordering::SeqCst), 2);
    let out = text(&buf);
    assert!(out.contains("An internal error occurred"));
    for secret in ["QueryFailed", "table users is locked", "SELECT password", "router_test"] {
        assert!(!out.contains(secret), "leaked {}", secret);
    }
    assert!(log.is_empty());
}

#[test]
fn test_dev_shows_full_report() {
    let (buf, output) = buffer();
    let log = DebugLog::new();
    let mut s = settings(true);
    s.configure("errorHandlerDev", "counted");
    let runtime = Arc::new(Runtime::new());
    let router = ErrorRouter::new(log.clone(), Some(Arc::new(s)), Arc::clone(&runtime), output);
    let (calls, _, renderer) = counting(render_dev);
    router.register_renderer("counted", renderer);
    router.register_handlers();

    log.add_message(Message::new("Query", "SELECT 1", vec![], 0, None));
    log.add_message(Message::new("Template", "orders.html", vec![], 0, None));
    let outcome = runtime.run(|| Err(Exception::new("TemplateMissing", "orders.html not found")));

    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let out = text(&buf);
    assert!(out.contains("TemplateMissing"));
    assert!(out.contains("orders.html not found"));
    assert!(out.contains("Query"));
    assert!(out.contains("Template"));
    assert!(out.contains("Stack Trace:"));
}

#[test]
fn test_query_timing_scenario() {
    let log = DebugLog::new();
    let index = log.add_message(Message::new("Query", "SELECT 1", vec![], 0, None));
    assert_eq!(index, 1);
    log.complete_event(index).unwrap();
    let description = log.get_log(false)[0].time_description();
    let pattern =
        regex::Regex::new(r"^start: \d+\.\d{4} sec, end: \d+\.\d{4} sec, time: \d+\.\d{4} sec$")
            .unwrap();
    assert!(pattern.is_match(&description), "{}", description);
}

#[test]
fn test_notice_continues_and_warning_raises() {
    let (buf, output) = buffer();
    let tuffy = Tuffy::init(settings(true), output).unwrap();

    tuffy
        .trigger_error(ErrorLevel::Notice, "undefined index: coupon")
        .unwrap();
    let log = tuffy.log().get_log(false);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].title(), "Notice");
    assert!(log[0].is_problem());

    let err = tuffy
        .trigger_error(ErrorLevel::Warning, "division by zero")
        .unwrap_err();
    assert_eq!(err.name(), "ErrorException");
    assert_eq!(err.level(), Some(ErrorLevel::Warning));
    assert!(err.file().unwrap().ends_with("router_test.rs"));
    assert_eq!(tuffy.log().len(), 1);
    assert!(text(&buf).is_empty());
}

#[test]
fn test_panic_is_rendered_at_shutdown() {
    let (buf, output) = buffer();
    let tuffy = Tuffy::init(settings(true), output).unwrap();
    let outcome = tuffy.run(|t| {
        t.debug("Before crash", "loading orders");
        panic!("allowed memory size exhausted");
    });
    assert_eq!(outcome, Outcome::Failed);
    let out = text(&buf);
    assert!(out.contains("ErrorException"));
    assert!(out.contains("Fatal error: allowed memory size exhausted"));
    assert!(out.contains("Before crash"));
}

#[test]
fn test_unregistered_router_is_silent() {
    let (buf, output) = buffer();
    let tuffy = Tuffy::init(settings(true), output).unwrap();
    tuffy.router().unregister_handlers();
    let outcome = tuffy.run(|_| panic!("segfault"));
    assert_eq!(outcome, Outcome::Failed);
    assert!(text(&buf).is_empty());

    let warned = tuffy.trigger_error(ErrorLevel::UserWarning, "ignored");
    assert!(warned.is_ok());
}

#[test]
fn test_live_error_stacks_start_at_caller() {
    let hook_frames = ["trigger_error", "register_handlers", "handle_error"];

    let (_, output) = buffer();
    let tuffy = Tuffy::init(settings(true), output).unwrap();
    tuffy
        .trigger_error(ErrorLevel::Notice, "undefined index: coupon")
        .unwrap();
    let notice = &tuffy.log().get_log(true)[0];
    let first = &notice.stack()[0];
    assert!(first.name().contains("test_live_error_stacks_start_at_caller"), "{}", first);
    assert!(first.file().unwrap().ends_with("router_test.rs"));
    for frame in notice.stack() {
        assert!(hook_frames.iter().all(|h| !frame.name().contains(h)), "{}", frame);
    }

    let err = tuffy
        .trigger_error(ErrorLevel::Warning, "division by zero")
        .unwrap_err();
    let stack = err.stack();
    assert!(stack[0].name().contains("test_live_error_stacks_start_at_caller"), "{}", stack[0]);
    assert!(stack[0].file().unwrap().ends_with("router_test.rs"));
    for frame in &stack {
        assert!(hook_frames.iter().all(|h| !frame.name().contains(h)), "{}", frame);
    }
}

#[test]
fn test_rendered_promoted_error_hides_hook_frames() {
    let (buf, output) = buffer();
    let tuffy = Tuffy::init(settings(true), output).unwrap();
    let outcome = tuffy.run(|t| t.trigger_error(ErrorLevel::Warning, "stock below zero"));
    assert_eq!(outcome, Outcome::Handled);
    let out = text(&buf);
    assert!(out.contains("stock below zero"));
    assert!(!out.contains("register_handlers"));
    assert!(!out.contains("Runtime::trigger_error"));
    assert!(!out.contains("Tuffy::trigger_error"));
    assert!(out.contains("test_rendered_promoted_error_hides_hook_frames"));
}
