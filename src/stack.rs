// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 调用栈模块
//!
//! 平台给出的原始回溯中，每一帧记录的是“被调用的函数”与“调用者的文件和行号”，
//! 函数名与位置错开了一位。本模块把它改写为每帧的位置都落在该函数自身内部的形式，
//! 最底层统一以 `[main]` 结尾。
//!
//! 运行期捕获基于 `std::backtrace::Backtrace` 的文本输出，用正则表达式解析，
//! 再裁掉回溯机制自身以及 Rust 运行时的帧。

use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fmt,
};

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::param::{INTERNAL_CODE, MAIN_FRAME};

/// 原始帧缺少函数名时使用的名称
const UNKNOWN_FUNCTION: &str = "[unknown]";

/// 捕获时属于本设施自身、需要从栈顶裁掉的模块前缀
const OWN_MODULES: [&str; 2] = [
    concat!(module_path!(), "::"),
    concat!(env!("CARGO_CRATE_NAME"), "::exception::"),
];

lazy_static! {
    /// 应用根目录（以 `/` 结尾）。位于其下的文件在栈帧中显示为相对路径。
    static ref APP_ROOT: String = {
        let root = match std::env::var("TUFFY_APP_PATH") {
            Ok(path) => path,
            Err(_) => std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let root = root.trim_end_matches(['/', '\\']);
        if root.is_empty() {
            String::new()
        } else {
            format!("{}/", root)
        }
    };
    static ref FRAME_INDEX: Regex = Regex::new(r"^\s*\d+:\s+").unwrap();
    static ref FRAME_LOCATION: Regex = Regex::new(r"^\s*at\s+(.+?):(\d+)(?::\d+)?\s*$").unwrap();
    static ref SYMBOL_HASH: Regex = Regex::new(r"::h[0-9a-f]{16}$").unwrap();
    static ref MACHINERY_FRAME: Regex =
        Regex::new(r"^<?(std::backtrace|std::backtrace_rs|backtrace::)").unwrap();
    static ref RUNTIME_FRAME: Regex = Regex::new(
        r"^(<?(std|core|alloc|test)::|<\S+ as (std|core|alloc)::|__|_start|start_thread|clone|thread_start|<unknown>)"
    )
    .unwrap();
    /// 错误上报经过的拦截路径：上报入口、错误钩子闭包及钩子本身，以及闭包调用的胶水帧。
    static ref INTERCEPTION_FRAME: Regex = Regex::new(&format!(
        r"^(<?{name}::(context::Tuffy::trigger_error|runtime::Runtime::trigger_error|router::ErrorRouter::(handle_error|register_handlers::\{{\{{closure\}}\}}))|<?(core|alloc)::ops::function::|<\S+ as (core|alloc)::ops::function::)",
        name = env!("CARGO_CRATE_NAME")
    ))
    .unwrap();
}

/// 平台库源码所在的路径前缀
const TOOLCHAIN_SOURCE: &str = "/rustc/";

/// 应用根目录，以 `/` 结尾；无法确定时为空字符串。
pub fn app_root() -> &'static str {
    &APP_ROOT
}

/// 平台约定的原始栈帧：被调用函数的标识，加上调用者所在的位置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    pub class: Option<String>,
    pub call_type: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl RawFrame {
    /// 只记录普通函数名的帧
    pub fn function(name: &str) -> Self {
        Self {
            function: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// 带限定名的调用，例如 `("Session", "::", "start")`
    pub fn method(class: &str, call_type: &str, name: &str) -> Self {
        Self {
            class: Some(class.to_string()),
            call_type: Some(call_type.to_string()),
            function: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// 只有位置、没有函数的帧
    pub fn location(file: Option<&str>, line: Option<u32>) -> Self {
        Self::default().at(file, line)
    }

    pub fn at(mut self, file: Option<&str>, line: Option<u32>) -> Self {
        self.file = file.map(str::to_string);
        self.line = line;
        self
    }

    /// 由 Rust 符号路径拆出限定名与函数名
    fn from_symbol(symbol: &str) -> Self {
        match split_symbol(symbol) {
            Some((class, function)) => Self::method(class, "::", function),
            None => Self::function(symbol),
        }
    }
}

/// 规范化后的一帧调用栈。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    class: Option<String>,
    call_type: Option<String>,
    function: String,
    file: Option<String>,
    line: Option<u32>,
}

impl StackFrame {
    pub fn new(
        class: Option<String>,
        call_type: Option<String>,
        function: impl Into<String>,
        file: Option<&str>,
        line: Option<u32>,
    ) -> Self {
        Self {
            class,
            call_type,
            function: function.into(),
            file: file.map(relative_to_app),
            line,
        }
    }

    /// 栈底帧
    pub fn main(file: Option<&str>, line: Option<u32>) -> Self {
        Self::new(None, None, MAIN_FRAME, file, line)
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn call_type(&self) -> Option<&str> {
        self.call_type.as_deref()
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    /// 产生这次调用的函数的完整限定名。
    pub fn name(&self) -> String {
        match &self.call_type {
            Some(call_type) => format!(
                "{}{}{}",
                self.class.as_deref().unwrap_or(""),
                call_type,
                self.function
            ),
            None => self.function.clone(),
        }
    }

    /// 文件与行号的组合描述。
    pub fn location(&self) -> String {
        match (&self.file, self.line) {
            (None, None) => INTERNAL_CODE.to_string(),
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            (None, Some(line)) => format!("{}:{}", UNKNOWN_FUNCTION, line),
        }
    }

    pub fn is_main(&self) -> bool {
        self.call_type.is_none() && self.function == MAIN_FRAME
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "{}", self.location())
        } else {
            write!(f, "{}() at {}", self.name(), self.location())
        }
    }
}

fn relative_to_app(file: &str) -> String {
    let root = app_root();
    if !root.is_empty() {
        if let Some(rest) = file.strip_prefix(root) {
            return rest.to_string();
        }
    }
    file.strip_prefix("./").unwrap_or(file).to_string()
}

/// 把平台约定的原始回溯改写为规范化的调用栈。
///
/// 若给出了 `origin_file` 或 `origin_line`（例如异常的抛出点），先在最前面插入一个只有位置的帧。
/// 此后第 `i` 帧取原始第 `i` 帧的函数与第 `i - 1` 帧的位置，
/// 最后以 `[main]` 收尾，位置取最后一个原始帧。
/// 结果的长度等于（插入后的）原始帧数；空输入得到一个没有位置的 `[main]`。
pub fn normalize(
    raw: &[RawFrame],
    origin_file: Option<&str>,
    origin_line: Option<u32>,
) -> Vec<StackFrame> {
    let origin = if origin_file.is_some() || origin_line.is_some() {
        Some(RawFrame::location(origin_file, origin_line))
    } else {
        None
    };
    let tb: Vec<&RawFrame> = origin.iter().chain(raw.iter()).collect();

    let Some(bottom) = tb.last() else {
        return vec![StackFrame::main(None, None)];
    };

    let mut calls = Vec::with_capacity(tb.len());
    for pair in tb.windows(2) {
        let (loc, name) = (pair[0], pair[1]);
        calls.push(StackFrame::new(
            name.class.clone(),
            name.call_type.clone(),
            name.function.as_deref().unwrap_or(UNKNOWN_FUNCTION),
            loc.file.as_deref(),
            loc.line,
        ));
    }
    calls.push(StackFrame::main(bottom.file.as_deref(), bottom.line));
    calls
}

/// 捕获当前调用栈并规范化，首帧是调用 `capture` 的函数。
///
/// `skip` 表示再从栈顶去掉的帧数，`[main]` 帧永远保留。
#[inline(never)]
pub fn capture(skip: usize) -> Vec<StackFrame> {
    let mut frames = normalize(&capture_raw(), None, None);
    let skip = skip.min(frames.len() - 1);
    frames.drain(..skip);
    frames
}

/// 按平台约定捕获原始回溯，首帧是代表捕获动作本身的合成帧。
#[inline(never)]
pub fn capture_raw() -> Vec<RawFrame> {
    let frames = application_frames();
    let mut raw = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let callee = match index {
            0 => RawFrame::method(module_path!(), "::", "capture"),
            _ => RawFrame::from_symbol(&frames[index - 1].symbol),
        };
        raw.push(callee.at(frame.file.as_deref(), frame.line));
    }
    raw
}

/// 为异常捕获原始回溯：去掉合成帧，首帧即抛出异常的函数。
#[inline(never)]
pub fn capture_trace() -> Vec<RawFrame> {
    let mut raw = capture_raw();
    if !raw.is_empty() {
        raw.remove(0);
    }
    raw
}

/// 从 `std` 回溯文本中解析出的一帧（Rust 约定：函数与其内部的位置）
#[derive(Debug, Clone, PartialEq)]
struct ParsedFrame {
    symbol: String,
    file: Option<String>,
    line: Option<u32>,
}

fn application_frames() -> Vec<ParsedFrame> {
    let backtrace = Backtrace::force_capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    trim_frames(parse_backtrace(&backtrace.to_string()))
}

/// 裁掉栈顶的回溯机制、本设施自身与错误拦截路径上的帧，以及栈底的运行时帧。
fn trim_frames(mut frames: Vec<ParsedFrame>) -> Vec<ParsedFrame> {
    let lead = frames
        .iter()
        .position(|f| {
            !MACHINERY_FRAME.is_match(&f.symbol)
                && !is_own_frame(&f.symbol)
                && !INTERCEPTION_FRAME.is_match(&f.symbol)
        })
        .unwrap_or(frames.len());
    frames.drain(..lead);
    while frames.last().map_or(false, is_runtime_frame) {
        frames.pop();
    }
    frames
}

fn is_runtime_frame(frame: &ParsedFrame) -> bool {
    RUNTIME_FRAME.is_match(&frame.symbol)
        || frame
            .file
            .as_deref()
            .map_or(false, |file| file.starts_with(TOOLCHAIN_SOURCE))
}

fn is_own_frame(symbol: &str) -> bool {
    let symbol = symbol.strip_prefix('<').unwrap_or(symbol);
    OWN_MODULES.iter().any(|m| symbol.starts_with(m)) && !symbol.contains("::tests::")
}

fn parse_backtrace(text: &str) -> Vec<ParsedFrame> {
    let mut frames: Vec<ParsedFrame> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FRAME_LOCATION.captures(line) {
            if let Some(last) = frames.last_mut() {
                if last.file.is_none() {
                    last.file = Some(caps[1].to_string());
                    last.line = caps[2].parse().ok();
                }
            }
            continue;
        }
        let symbol = FRAME_INDEX.replace(line, "");
        let symbol = SYMBOL_HASH.replace(symbol.trim(), "");
        if symbol.is_empty() || symbol.starts_with("note:") {
            continue;
        }
        frames.push(ParsedFrame {
            symbol: symbol.into_owned(),
            file: None,
            line: None,
        });
    }
    frames
}

/// 在最后一个顶层 `::` 处拆分符号，尖括号内的路径不参与拆分。
fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    let mut split = None;
    let mut prev = '\0';
    for (i, c) in symbol.char_indices() {
        match c {
            '<' => depth += 1,
            '>' if prev != '-' => depth -= 1,
            ':' if depth == 0 && prev != ':' && symbol[i..].starts_with("::") => split = Some(i),
            _ => {}
        }
        prev = c;
    }
    let i = split?;
    let (class, function) = (&symbol[..i], &symbol[i + 2..]);
    if class.is_empty() || function.is_empty() {
        return None;
    }
    Some((class, function))
}
