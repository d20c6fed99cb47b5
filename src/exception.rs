// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了调试设施在请求生命周期中可能抛出或路由的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：区分可恢复的提示（Notice）、可提升为异常的错误以及致命错误。
//! - **退出哨兵**：`Exit` 不是真正的错误，异常路由器会静默地结束请求。
//! - **用户友好**：通过实现 `std::fmt::Display`，确保错误信息可以被安全地写入报告或日志。

use std::{fmt, panic::Location};

use crate::stack::{self, RawFrame, StackFrame};

/// 宿主运行时上报的错误级别。
///
/// 只有 `Notice`、`UserNotice` 与 `Strict` 会被记入调试日志并继续执行，
/// 其余级别在处理器注册后都会被提升为 [`Exception`]。
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorLevel {
    /// 运行期致命错误
    Error,
    /// 运行期警告
    Warning,
    /// 解析错误
    Parse,
    /// 运行期提示
    Notice,
    /// 启动阶段的核心错误
    CoreError,
    /// 启动阶段的核心警告
    CoreWarning,
    /// 编译期致命错误
    CompileError,
    /// 编译期警告
    CompileWarning,
    /// 应用代码主动触发的错误
    UserError,
    /// 应用代码主动触发的警告
    UserWarning,
    /// 应用代码主动触发的提示
    UserNotice,
    /// 代码规范建议
    Strict,
    /// 可捕获的致命错误
    RecoverableError,
    /// 已弃用功能的使用提醒
    Deprecated,
    /// 应用代码主动触发的弃用提醒
    UserDeprecated,
}

use ErrorLevel::*;

impl ErrorLevel {
    /// 是否为仅需记录、无需中断执行的提示级别。
    pub fn is_notice(self) -> bool {
        matches!(self, Notice | UserNotice | Strict)
    }

    /// 是否为无人处理时会终止请求的致命级别。
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Error | Parse | CoreError | CompileError | UserError | RecoverableError
        )
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Error => "error",
            Warning => "warning",
            Parse => "parse error",
            Notice => "notice",
            CoreError => "core error",
            CoreWarning => "core warning",
            CompileError => "compile error",
            CompileWarning => "compile warning",
            UserError => "user error",
            UserWarning => "user warning",
            UserNotice => "user notice",
            Strict => "strict standards",
            RecoverableError => "recoverable error",
            Deprecated => "deprecated",
            UserDeprecated => "user deprecated",
        };
        write!(f, "{}", name)
    }
}

/// 异常的类别。
#[derive(Debug, Clone, PartialEq)]
pub enum ExceptionKind {
    /// 请求主动退出。异常处理器会静默忽略它，不产生任何输出。
    Exit,
    /// 由宿主运行时错误包装而来的异常，显示名为 `ErrorException`。
    Error(ErrorLevel),
    /// 应用自定义的异常，携带其类型名。
    Custom(String),
}

/// 在请求处理过程中抛出并最终交给异常路由器的异常。
///
/// 异常保存抛出点（文件与行号）以及按平台约定记录的原始调用栈，
/// 渲染时再经由 [`stack::normalize`] 规范化。
#[derive(Debug, Clone)]
pub struct Exception {
    kind: ExceptionKind,
    message: String,
    file: Option<String>,
    line: Option<u32>,
    trace: Vec<RawFrame>,
}

impl Exception {
    /// 以调用位置为抛出点构造一个自定义异常，并捕获当前调用栈。
    #[track_caller]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            kind: ExceptionKind::Custom(name.into()),
            message: message.into(),
            file: Some(location.file().to_string()),
            line: Some(location.line()),
            trace: stack::capture_trace(),
        }
    }

    /// 请求退出的哨兵异常。用它代替直接结束进程，调用方仍可以选择捕获。
    pub fn exit() -> Self {
        Self::with_trace(ExceptionKind::Exit, "", None, None, Vec::new())
    }

    /// 将宿主运行时上报的错误包装为异常，抛出点为错误发生的位置。
    pub fn from_error(
        level: ErrorLevel,
        message: impl Into<String>,
        file: Option<&str>,
        line: Option<u32>,
    ) -> Self {
        Self::with_trace(
            ExceptionKind::Error(level),
            message,
            file,
            line,
            stack::capture_trace(),
        )
    }

    /// 使用给定的调用栈构造异常，不做任何捕获。
    pub fn with_trace(
        kind: ExceptionKind,
        message: impl Into<String>,
        file: Option<&str>,
        line: Option<u32>,
        trace: Vec<RawFrame>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            file: file.map(str::to_string),
            line,
            trace,
        }
    }
}

impl Exception {
    pub fn kind(&self) -> &ExceptionKind {
        &self.kind
    }

    /// 异常的类型名，相当于其“类名”。
    pub fn name(&self) -> &str {
        match &self.kind {
            ExceptionKind::Exit => "Exit",
            ExceptionKind::Error(_) => "ErrorException",
            ExceptionKind::Custom(name) => name,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn trace(&self) -> &[RawFrame] {
        &self.trace
    }

    /// 被包装的宿主错误级别；非包装异常返回 `None`。
    pub fn level(&self) -> Option<ErrorLevel> {
        match self.kind {
            ExceptionKind::Error(level) => Some(level),
            _ => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.kind == ExceptionKind::Exit
    }

    /// 以抛出点为起点的规范化调用栈。
    pub fn stack(&self) -> Vec<StackFrame> {
        stack::normalize(&self.trace, self.file.as_deref(), self.line)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message)
    }
}

impl std::error::Error for Exception {}

impl From<DebugError> for Exception {
    #[track_caller]
    fn from(e: DebugError) -> Self {
        Exception::new("DebugError", e.to_string())
    }
}

impl From<std::io::Error> for Exception {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Exception::new("IoError", e.to_string())
    }
}

/// 调试日志操作失败的原因。
///
/// 这些都是调用方的编程错误或持久化失败，一律显式返回而不是静默忽略。
#[derive(Debug)]
pub enum DebugError {
    /// `complete_event` 收到的 1 起始下标超出了日志范围。
    NoSuchEvent(usize),
    /// 消息已经被标记为完成，不能再次完成。
    AlreadyCompleted,
    /// 完成时间早于消息的开始时间。
    CompletedBeforeStart { start: f64, end: f64 },
    /// 会话中的日志无法序列化或反序列化。
    Session(serde_json::Error),
}

impl fmt::Display for DebugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugError::NoSuchEvent(index) => write!(f, "No debug event at index {}", index),
            DebugError::AlreadyCompleted => write!(f, "Debug event was already completed"),
            DebugError::CompletedBeforeStart { start, end } => write!(
                f,
                "Completion time {:.4} precedes start time {:.4}",
                end, start
            ),
            DebugError::Session(e) => write!(f, "Couldn't persist debug log in session: {}", e),
        }
    }
}

impl std::error::Error for DebugError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DebugError::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DebugError {
    fn from(e: serde_json::Error) -> Self {
        DebugError::Session(e)
    }
}
