// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 宿主运行时模块
//!
//! 提供异常路由器所依赖的进程级设施：
//! - 错误处理器栈与异常处理器栈（注册即压栈，恢复即出栈）。
//! - 进程结束时执行的收尾函数。
//! - 最近一次致命错误的记录。
//! - 在 `catch_unwind` 保护下执行一次请求，并在结束时运行收尾函数。

use std::{
    any::Any,
    cell::RefCell,
    panic::{self, AssertUnwindSafe, Location},
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, error, warn};

use crate::exception::{ErrorLevel, Exception};

/// 错误处理器：接收错误级别、消息与发生位置，返回 `Err` 表示把错误提升为异常。
pub type ErrorHandler =
    Arc<dyn Fn(ErrorLevel, &str, Option<&str>, Option<u32>) -> Result<(), Exception> + Send + Sync>;

/// 未捕获异常的处理器
pub type ExceptionHandler = Arc<dyn Fn(Exception) -> Handled + Send + Sync>;

/// 进程结束时执行的收尾函数
pub type ShutdownFunction = Box<dyn FnOnce() + Send>;

/// 异常处理器对一个异常的处置结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// 已经渲染并输出了报告
    Rendered,
    /// 请求主动退出，没有任何输出
    Exit,
    /// 处理器已经失效，异常没有被处理
    Unhandled,
}

/// 一次请求的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 正常结束
    Completed,
    /// 未捕获的异常已由异常处理器渲染
    Handled,
    /// 请求主动退出
    Exited,
    /// 请求崩溃，或异常无人处理
    Failed,
}

/// 最近一次致命错误
#[derive(Debug, Clone, PartialEq)]
pub struct FatalError {
    pub level: ErrorLevel,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

thread_local! {
    static PANIC_SITE: RefCell<Option<(String, u32)>> = const { RefCell::new(None) };
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct Runtime {
    error_handlers: Mutex<Vec<ErrorHandler>>,
    exception_handlers: Mutex<Vec<ExceptionHandler>>,
    shutdown_functions: Mutex<Vec<ShutdownFunction>>,
    last_fatal: Mutex<Option<FatalError>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装进程级 panic 钩子：记录 panic 发生的位置，并屏蔽默认的 stderr 输出。
    ///
    /// panic 本身的处理仍由 [`Runtime::run`] 完成。
    pub fn install_panic_hook() {
        panic::set_hook(Box::new(|info| {
            if let Some(location) = info.location() {
                PANIC_SITE.with(|site| {
                    *site.borrow_mut() = Some((location.file().to_string(), location.line()));
                });
            }
        }));
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        lock(&self.error_handlers).push(handler);
    }

    /// 恢复上一个错误处理器。只有当前处理器正是最后注册的那个时，结果才是预期的。
    pub fn restore_error_handler(&self) -> bool {
        lock(&self.error_handlers).pop().is_some()
    }

    pub fn set_exception_handler(&self, handler: ExceptionHandler) {
        lock(&self.exception_handlers).push(handler);
    }

    pub fn restore_exception_handler(&self) -> bool {
        lock(&self.exception_handlers).pop().is_some()
    }

    /// 注册收尾函数。收尾函数无法注销。
    pub fn register_shutdown_function(&self, function: impl FnOnce() + Send + 'static) {
        lock(&self.shutdown_functions).push(Box::new(function));
    }

    pub fn record_fatal(&self, fatal: FatalError) {
        *lock(&self.last_fatal) = Some(fatal);
    }

    pub fn last_fatal_error(&self) -> Option<FatalError> {
        lock(&self.last_fatal).clone()
    }

    /// 上报一个错误，位置取调用处。
    ///
    /// 有错误处理器时交给栈顶的处理器；否则致命级别提升为异常，其余级别只记录日志。
    #[track_caller]
    pub fn trigger_error(&self, level: ErrorLevel, message: &str) -> Result<(), Exception> {
        let location = Location::caller();
        let handler = lock(&self.error_handlers).last().cloned();
        match handler {
            Some(handler) => handler(level, message, Some(location.file()), Some(location.line())),
            None if level.is_fatal() => Err(Exception::from_error(
                level,
                message,
                Some(location.file()),
                Some(location.line()),
            )),
            None => {
                warn!("{}: {} ({}:{})", level, message, location.file(), location.line());
                Ok(())
            }
        }
    }

    /// 把未捕获的异常交给栈顶的异常处理器。
    pub fn raise(&self, exc: Exception) -> Outcome {
        let handler = lock(&self.exception_handlers).last().cloned();
        match handler {
            Some(handler) => match handler(exc) {
                Handled::Rendered => Outcome::Handled,
                Handled::Exit => Outcome::Exited,
                Handled::Unhandled => Outcome::Failed,
            },
            None if exc.is_exit() => Outcome::Exited,
            None => {
                error!("未捕获的异常：{}", exc);
                Outcome::Failed
            }
        }
    }

    /// 执行一次请求，随后运行收尾函数。
    ///
    /// 请求体返回的 `Err` 视为未捕获的异常；请求体或异常处理器中的 panic 记录为致命错误，
    /// 留给收尾函数处理。一个运行时只应执行一次请求。
    pub fn run<F>(&self, body: F) -> Outcome
    where
        F: FnOnce() -> Result<(), Exception>,
    {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(exc)) => match panic::catch_unwind(AssertUnwindSafe(|| self.raise(exc))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    self.record_panic(payload.as_ref(), "异常处理器");
                    Outcome::Failed
                }
            },
            Err(payload) => {
                self.record_panic(payload.as_ref(), "请求处理过程");
                Outcome::Failed
            }
        };
        self.shutdown();
        outcome
    }

    fn record_panic(&self, payload: &(dyn Any + Send), stage: &str) {
        let message = panic_message(payload);
        let site = PANIC_SITE.with(|site| site.borrow_mut().take());
        error!("{}中发生panic：{}", stage, message);
        self.record_fatal(FatalError {
            level: ErrorLevel::Error,
            message,
            file: site.as_ref().map(|(file, _)| file.clone()),
            line: site.map(|(_, line)| line),
        });
    }

    /// 依次执行全部收尾函数，每个函数只执行一次。某个函数 panic 不影响其余函数。
    pub fn shutdown(&self) {
        let functions = std::mem::take(&mut *lock(&self.shutdown_functions));
        debug!("执行{}个收尾函数", functions.len());
        for function in functions {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(function)) {
                error!("收尾函数中发生panic：{}", panic_message(payload.as_ref()));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_trigger_error_without_handler() {
        let runtime = Runtime::new();
        assert!(runtime.trigger_error(ErrorLevel::Warning, "careful").is_ok());
        let err = runtime.trigger_error(ErrorLevel::UserError, "bad").unwrap_err();
        assert_eq!(err.level(), Some(ErrorLevel::UserError));
        assert!(err.file().unwrap().ends_with("runtime.rs"));
    }

    #[test]
    fn test_error_handler_stack() {
        let runtime = Runtime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        runtime.set_error_handler(Arc::new(
            move |_level: ErrorLevel, _message: &str, file: Option<&str>, line: Option<u32>| {
                assert!(file.is_some() && line.is_some());
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ));
        runtime.trigger_error(ErrorLevel::UserError, "handled").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(runtime.restore_error_handler());
        assert!(runtime.trigger_error(ErrorLevel::UserError, "again").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!runtime.restore_error_handler());
    }

    #[test]
    fn test_run_completed_runs_shutdown_once() {
        let runtime = Runtime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        runtime.register_shutdown_function(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runtime.run(|| Ok(())), Outcome::Completed);
        runtime.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_routes_errors() {
        let runtime = Runtime::new();
        assert_eq!(
            runtime.run(|| Err(Exception::new("Oops", "x"))),
            Outcome::Failed
        );
        assert_eq!(Runtime::new().run(|| Err(Exception::exit())), Outcome::Exited);

        let runtime = Runtime::new();
        runtime.set_exception_handler(Arc::new(|exc: Exception| {
            if exc.is_exit() {
                Handled::Exit
            } else {
                Handled::Rendered
            }
        }));
        assert_eq!(
            runtime.run(|| Err(Exception::new("Oops", "x"))),
            Outcome::Handled
        );
    }

    #[test]
    fn test_run_records_panic_as_fatal() {
        let runtime = Runtime::new();
        let outcome = runtime.run(|| panic!("out of memory"));
        assert_eq!(outcome, Outcome::Failed);
        let fatal = runtime.last_fatal_error().unwrap();
        assert_eq!(fatal.level, ErrorLevel::Error);
        assert_eq!(fatal.message, "out of memory");
    }

    #[test]
    fn test_panicking_exception_handler_still_runs_shutdown() {
        let runtime = Runtime::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        runtime.set_exception_handler(Arc::new(|_exc: Exception| -> Handled {
            panic!("renderer crashed")
        }));
        runtime.register_shutdown_function(|| panic!("second crash"));
        runtime.register_shutdown_function(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = runtime.run(|| Err(Exception::new("Oops", "x")));
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.last_fatal_error().unwrap().message, "renderer crashed");
    }

    #[test]
    fn test_unhandled_exception_fails() {
        let runtime = Runtime::new();
        runtime.set_exception_handler(Arc::new(|_exc: Exception| Handled::Unhandled));
        assert_eq!(runtime.raise(Exception::new("Oops", "x")), Outcome::Failed);
    }

    #[test]
    fn test_panic_message() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(other.as_ref()), "Box<dyn Any>");
    }
}
