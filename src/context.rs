// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 框架上下文
//!
//! `Tuffy` 持有一次请求所需的全部调试设施：设置、调试日志、宿主运行时与异常路由器。
//! 应用代码通过它的句柄记录调试消息，而不是访问进程级的全局变量。

use std::sync::Arc;

use log::info;

use crate::{
    config::{Settings, SettingsError},
    debug_log::DebugLog,
    exception::{DebugError, ErrorLevel, Exception},
    message::{start_clock, Debuggable, Message, Payload},
    param::{leftovers_key, PROBLEM},
    router::{ErrorRouter, Output},
    runtime::{Outcome, Runtime},
    session::SessionStore,
    stack,
};

pub struct Tuffy {
    settings: Arc<Settings>,
    log: DebugLog,
    runtime: Arc<Runtime>,
    router: Arc<ErrorRouter>,
}

impl Tuffy {
    /// 校验设置、开始计时并注册异常路由器。缺少 `appName` 时拒绝启动。
    pub fn init(settings: Settings, output: Output) -> Result<Self, SettingsError> {
        settings.validate()?;
        start_clock();

        let settings = Arc::new(settings);
        let log = DebugLog::new();
        let runtime = Arc::new(Runtime::new());
        let router = ErrorRouter::new(
            log.clone(),
            Some(Arc::clone(&settings)),
            Arc::clone(&runtime),
            output,
        );
        router.register_handlers();
        info!(
            "{}已初始化，调试模式：{}",
            settings.app_name().unwrap_or_default(),
            settings.debug()
        );

        Ok(Self {
            settings,
            log,
            runtime,
            router,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn log(&self) -> &DebugLog {
        &self.log
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn router(&self) -> &Arc<ErrorRouter> {
        &self.router
    }

    /// 记录一条调试消息，调用栈从调用者开始。
    ///
    /// 只在调试模式下记录；返回的下标可以交给 [`Tuffy::complete`] 标记耗时操作的结束。
    #[inline(never)]
    pub fn debug(&self, title: &str, data: impl Into<Payload>) -> Option<usize> {
        self.record(title, data.into(), 0, 0)
    }

    /// 与 [`Tuffy::debug`] 相同，但消息带有 `PROBLEM` 标志。
    #[inline(never)]
    pub fn warn(&self, title: &str, data: impl Into<Payload>) -> Option<usize> {
        self.record(title, data.into(), PROBLEM, 0)
    }

    /// 从栈顶再去掉 `skip` 帧，供对数据库、HTTP 客户端等做封装的代码使用。
    #[inline(never)]
    pub fn debug_skipping(&self, title: &str, data: impl Into<Payload>, skip: usize) -> Option<usize> {
        self.record(title, data.into(), 0, skip)
    }

    #[inline(never)]
    pub fn warn_skipping(&self, title: &str, data: impl Into<Payload>, skip: usize) -> Option<usize> {
        self.record(title, data.into(), PROBLEM, skip)
    }

    // 去掉 record 自身和公开入口两帧
    #[inline(never)]
    fn record(&self, title: &str, data: Payload, flags: u32, skip: usize) -> Option<usize> {
        if !self.settings.debug() {
            return None;
        }
        let stack = stack::capture(2 + skip);
        Some(self.log.add_message(Message::new(title, data, stack, flags, None)))
    }

    /// 完成 `debug`/`warn` 返回的事件；调试模式关闭时收到的是 `None`，什么也不做。
    pub fn complete(&self, index: Option<usize>) -> Result<(), DebugError> {
        match index {
            Some(index) => self.log.complete_event(index),
            None => Ok(()),
        }
    }

    fn sessions_enabled(&self) -> bool {
        self.settings.debug() && self.settings.use_sessions()
    }

    fn leftovers_key(&self) -> String {
        leftovers_key(self.settings.app_name().unwrap_or_default())
    }

    /// 会话开始时恢复上一次请求重定向前留下的日志，并记录会话内容。
    pub fn start_session<S>(&self, store: &mut S) -> Result<(), DebugError>
    where
        S: SessionStore + Debuggable,
    {
        if !self.sessions_enabled() {
            return Ok(());
        }
        self.log.restore_from_session(store, &self.leftovers_key())?;
        let title = format!("Session {}", store.id());
        self.record(&title, Payload::debuggable(&*store), 0, 0);
        Ok(())
    }

    /// 重定向之前把日志存入会话，下一次请求由 [`Tuffy::start_session`] 取回。
    pub fn save_before_redirect<S: SessionStore>(
        &self,
        destination: &str,
        store: &mut S,
    ) -> Result<(), DebugError> {
        if !self.sessions_enabled() {
            return Ok(());
        }
        self.record("Redirecting", Payload::from(destination), 0, 0);
        self.log.save_in_session(store, &self.leftovers_key())
    }

    /// 请求主动结束。返回的 `Err` 应当一路 `?` 传出请求体，异常路由器会静默处理它。
    pub fn exit_script(&self) -> Result<(), Exception> {
        Err(Exception::exit())
    }

    #[track_caller]
    pub fn trigger_error(&self, level: ErrorLevel, message: &str) -> Result<(), Exception> {
        self.runtime.trigger_error(level, message)
    }

    /// 执行一次请求。请求体返回的异常与 panic 都交给异常路由器。
    pub fn run<F>(&self, body: F) -> Outcome
    where
        F: FnOnce(&Self) -> Result<(), Exception>,
    {
        self.runtime.run(|| body(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use std::sync::Mutex;

    fn tuffy(debug: bool) -> (Arc<Mutex<Vec<u8>>>, Tuffy) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut settings = Settings::new();
        settings.configure("appName", "shop");
        settings.configure("debug", debug);
        let tuffy = Tuffy::init(settings, buf.clone()).unwrap();
        (buf, tuffy)
    }

    fn text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buf.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_init_requires_app_name() {
        let buf: Output = Arc::new(Mutex::new(Vec::new()));
        assert!(matches!(
            Tuffy::init(Settings::new(), buf),
            Err(SettingsError::MissingAppName)
        ));
    }

    #[test]
    fn test_debug_records_caller() {
        let (_, tuffy) = tuffy(true);
        assert_eq!(tuffy.debug("Query", "SELECT 1"), Some(1));
        assert_eq!(tuffy.warn("Slow", "2.5 sec"), Some(2));

        let log = tuffy.log().get_log(false);
        assert_eq!(log[0].title(), "Query");
        assert!(!log[0].is_problem());
        assert!(log[1].is_problem());
        let stack = log[0].stack();
        assert!(stack.last().unwrap().is_main());
        assert!(stack.iter().all(|f| !f.name().contains("Tuffy::record")));
        assert!(stack
            .iter()
            .any(|f| f.name().contains("test_debug_records_caller")));
    }

    #[test]
    fn test_debug_off_records_nothing() {
        let (_, tuffy) = tuffy(false);
        assert_eq!(tuffy.debug("Query", "SELECT 1"), None);
        assert_eq!(tuffy.warn("Slow", "x"), None);
        assert!(tuffy.log().is_empty());
        tuffy.complete(None).unwrap();
    }

    #[test]
    fn test_complete() {
        let (_, tuffy) = tuffy(true);
        let index = tuffy.debug("Query", "SELECT 1");
        tuffy.complete(index).unwrap();
        assert!(tuffy.log().get_log(false)[0].is_completed());
        assert!(matches!(
            tuffy.complete(index),
            Err(DebugError::AlreadyCompleted)
        ));
        assert!(matches!(
            tuffy.complete(Some(9)),
            Err(DebugError::NoSuchEvent(9))
        ));
    }

    #[test]
    fn test_redirect_then_start_session() {
        let (_, first) = tuffy(true);
        let mut store = MemorySession::new("abc");
        first.debug("Login", "user 7");
        first.save_before_redirect("/account", &mut store).unwrap();
        assert!(store.get("shop:debugLeftovers").is_some());

        let (_, second) = tuffy(true);
        second.start_session(&mut store).unwrap();
        let titles: Vec<String> = second
            .log()
            .get_log(false)
            .iter()
            .map(|m| m.title().to_string())
            .collect();
        assert_eq!(titles, ["Login", "Redirecting", "Session abc"]);
        assert!(store.get("shop:debugLeftovers").is_none());
    }

    #[test]
    fn test_sessions_disabled() {
        let buf: Output = Arc::new(Mutex::new(Vec::new()));
        let mut settings = Settings::new();
        settings.configure("appName", "shop");
        settings.configure("debug", true);
        settings.configure("useSessions", false);
        let tuffy = Tuffy::init(settings, buf).unwrap();
        let mut store = MemorySession::new("abc");
        tuffy.save_before_redirect("/account", &mut store).unwrap();
        assert!(store.is_empty());
        assert!(tuffy.log().is_empty());
    }

    #[test]
    fn test_run_renders_uncaught_exception() {
        let (buf, tuffy) = tuffy(true);
        let outcome = tuffy.run(|t| {
            t.debug("Query", "SELECT * FROM orders");
            Err(Exception::new("QueryFailed", "no such table: orders"))
        });
        assert_eq!(outcome, Outcome::Handled);
        let out = text(&buf);
        assert!(out.contains("QueryFailed"));
        assert!(out.contains("no such table: orders"));
        assert!(out.contains("Query"));
        assert!(tuffy.log().is_empty());
    }

    #[test]
    fn test_run_notice_and_exit() {
        let (buf, tuffy) = tuffy(true);
        let outcome = tuffy.run(|t| {
            t.trigger_error(ErrorLevel::UserNotice, "deprecated call")?;
            t.exit_script()?;
            t.debug("unreachable", "x");
            Ok(())
        });
        assert_eq!(outcome, Outcome::Exited);
        assert!(text(&buf).is_empty());
        let log = tuffy.log().get_log(false);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].title(), "Notice");
    }

    #[test]
    fn test_run_promoted_error_in_production() {
        let (buf, tuffy) = tuffy(false);
        let outcome = tuffy.run(|t| t.trigger_error(ErrorLevel::UserWarning, "disk almost full"));
        assert_eq!(outcome, Outcome::Handled);
        let out = text(&buf);
        assert!(out.contains("An internal error occurred"));
        assert!(!out.contains("disk almost full"));
    }
}
