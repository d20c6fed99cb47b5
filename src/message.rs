// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 调试消息模块
//!
//! 调试日志中的每一条记录都是一个 [`Message`]：标题、文本数据、产生时的调用栈、
//! 标志位以及相对请求开始的时间。耗时操作（查询、HTTP 调用）可以在结束时补记完成时间。

use std::{fmt, time::Instant};

use lazy_static::lazy_static;
use serde_derive::{Deserialize, Serialize};

use crate::{exception::DebugError, param::PROBLEM, stack::StackFrame};

lazy_static! {
    /// 请求开始的时刻，精确到纳秒。
    static ref REQUEST_START: Instant = Instant::now();
}

/// 固定请求开始时刻。应在进程启动时尽早调用，否则以第一次取时间为起点。
pub fn start_clock() {
    lazy_static::initialize(&REQUEST_START);
}

/// 当前时间相对请求开始的秒数。
pub fn request_time() -> f64 {
    REQUEST_START.elapsed().as_secs_f64()
}

/// 能够自行生成调试文本的值。
///
/// 记录到日志的非文本数据如果实现了该 trait，就用它的输出作为消息数据，
/// 否则使用 [`Payload::dump`] 的通用结构化输出。
pub trait Debuggable {
    fn to_debug(&self) -> String;
}

impl Debuggable for serde_json::Value {
    fn to_debug(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_string())
    }
}

/// 消息数据，统一转换为文本后保存。
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(String);

impl Payload {
    /// 通用的结构化输出
    pub fn dump<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Payload(format!("{:#?}", value))
    }

    pub fn debuggable<T: Debuggable + ?Sized>(value: &T) -> Self {
        Payload(value.to_debug())
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload(s)
    }
}

impl From<&String> for Payload {
    fn from(s: &String) -> Self {
        Payload(s.clone())
    }
}

impl<'a> From<&'a dyn Debuggable> for Payload {
    fn from(value: &'a dyn Debuggable) -> Self {
        Payload(value.to_debug())
    }
}

/// 调试日志中的一条消息。
///
/// 除了从“进行中”到“已完成”的一次性转换外，消息创建后不可修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    title: String,
    data: String,
    stack: Vec<StackFrame>,
    flags: u32,
    time: f64,
    complete_time: Option<f64>,
}

impl Message {
    /// 创建一条消息。`time` 为 `None` 时取当前的相对时间。
    pub fn new(
        title: impl Into<String>,
        data: impl Into<Payload>,
        stack: Vec<StackFrame>,
        flags: u32,
        time: Option<f64>,
    ) -> Self {
        Self {
            title: title.into(),
            data: data.into().into_string(),
            stack,
            flags,
            time: time.unwrap_or_else(request_time),
            complete_time: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn complete_time(&self) -> Option<f64> {
        self.complete_time
    }

    pub fn is_completed(&self) -> bool {
        self.complete_time.is_some()
    }

    /// 消息是否设置了 PROBLEM 标志。这类消息渲染时应当突出显示。
    pub fn is_problem(&self) -> bool {
        self.flags & PROBLEM != 0
    }

    /// 为消息补记完成时间，`None` 表示当前时间。
    ///
    /// 只能完成一次；完成时间不得早于开始时间。
    pub fn complete(&mut self, time: Option<f64>) -> Result<(), DebugError> {
        if self.complete_time.is_some() {
            return Err(DebugError::AlreadyCompleted);
        }
        let end = time.unwrap_or_else(request_time);
        if end < self.time {
            return Err(DebugError::CompletedBeforeStart {
                start: self.time,
                end,
            });
        }
        self.complete_time = Some(end);
        Ok(())
    }

    /// 检查从外部（例如会话）载入的消息是否满足完成时间不早于开始时间。
    pub fn validate(&self) -> Result<(), DebugError> {
        match self.complete_time {
            Some(end) if end < self.time || end.is_nan() => Err(DebugError::CompletedBeforeStart {
                start: self.time,
                end,
            }),
            _ => Ok(()),
        }
    }

    /// 格式化消息的时间信息。
    pub fn time_description(&self) -> String {
        match self.complete_time {
            Some(end) => format!(
                "start: {:.4} sec, end: {:.4} sec, time: {:.4} sec",
                self.time,
                end,
                end - self.time
            ),
            None => format!("at: {:.4} sec", self.time),
        }
    }
}
