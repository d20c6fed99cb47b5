// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 报告渲染模块
//!
//! 渲染器把（异常，调试日志）转换为最终写给客户端的文本。
//! - **生产环境**：完整报告只写入运维侧的日志，客户端只看到一段通用的致歉页面。
//! - **开发环境**：异常类型、消息、调用栈以及整份调试日志直接输出。

use std::{fmt::Write, sync::Arc};

use log::error;

use crate::{
    exception::Exception,
    message::Message,
    param::INCIDENT_TARGET,
    router::HANDLE_ERROR_FRAME,
    stack::StackFrame,
    util::{esc, indent_block, HtmlBuilder},
};

/// 渲染器：由异常与取出的调试日志生成输出文本。
pub type Renderer = Arc<dyn Fn(&Exception, &[Message]) -> String + Send + Sync>;

/// 异常的规范化调用栈。
///
/// 由错误钩子包装的异常，其最内层帧就是钩子本身，属于拦截产生的痕迹，予以去掉。
pub fn exception_trace(exc: &Exception) -> Vec<StackFrame> {
    let mut trace = exc.stack();
    if exc.level().is_some()
        && trace.len() > 1
        && trace.first().map(|f| f.name()).as_deref() == Some(HANDLE_ERROR_FRAME)
    {
        trace.remove(0);
    }
    trace
}

/// 以纯文本（或带转义的 HTML 片段）写出调试日志。
pub fn write_log(log: &[Message], html: bool) -> String {
    let text = |s: &str| if html { esc(s) } else { s.to_string() };
    let mut out = String::new();
    for entry in log {
        let title = if html && entry.is_problem() {
            format!("<strong class=\"problem\">{}</strong>", esc(entry.title()))
        } else {
            text(entry.title())
        };
        let _ = writeln!(out, "{} [{}]", title, entry.time_description());
        for frame in entry.stack() {
            let _ = writeln!(out, "    - {}", text(&frame.to_string()));
        }
        let _ = write!(out, "\n{}\n\n", text(&indent_block(entry.data())));
    }
    out
}

/// 写出异常描述、调用栈以及调试日志。
pub fn write_exception(exc: &Exception, log: &[Message], html: bool) -> String {
    let mut out = String::new();
    if html {
        let _ = write!(
            out,
            "<pre><strong>{}</strong>: {}\n\n",
            esc(exc.name()),
            esc(exc.message())
        );
    } else {
        let _ = write!(out, "{}: {}\n\n", exc.name(), exc.message());
    }

    out.push_str("Stack Trace:\n");
    for frame in exception_trace(exc) {
        let frame = frame.to_string();
        let _ = writeln!(out, "- {}", if html { esc(&frame) } else { frame });
    }
    out.push_str("\n\n");

    out.push_str(&write_log(log, html));
    if html {
        out.push_str("</pre>");
    }
    out
}

/// 生产环境渲染器。
///
/// 完整报告写入 `tuffy::incident` 日志，由日志配置转交给运维；返回的页面不含任何细节。
pub fn render_production(exc: &Exception, log: &[Message]) -> String {
    let detail = write_exception(exc, log, false);
    error!(target: INCIDENT_TARGET, "{}", detail);
    HtmlBuilder::apology().build()
}

/// 开发环境渲染器，输出完整的错误报告页。
pub fn render_dev(exc: &Exception, log: &[Message]) -> String {
    let title = format!("{}: {}", exc.name(), exc.message());
    HtmlBuilder::from_report(&title, &write_exception(exc, log, true)).build()
}
