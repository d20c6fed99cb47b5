// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::param::WRAP_WIDTH;

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    /// 生产环境的通用错误页，不包含任何技术细节
    pub fn apology() -> Self {
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let body = r"
            <h1>An internal error occurred</h1>
            <p>The error has been logged and sent to this site's administrators. We apologize for the inconvenience.</p>
            "
        .to_string();
        Self {
            title: "Internal error".to_string(),
            css,
            body,
        }
    }

    /// 开发环境的错误报告页，`report` 必须是已经转义过的 HTML
    pub fn from_report(title: &str, report: &str) -> Self {
        let css = r"
            pre {
                font-family: Menlo, Consolas, monospace;
                font-size: 13px;
                white-space: pre-wrap;
            }

            .problem {
                color: #b00020;
            }"
        .to_string();
        Self {
            title: esc(title),
            css,
            body: report.to_string(),
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!doctype html>
<html>
    <head>
        <meta charset="utf-8">
        <title>{}</title>
        <style>{}</style>
    </head>
    <body>
{}
    </body>
</html>"##,
            self.title, self.css, self.body
        )
    }
}

/// 转义 HTML，同时转义引号，放在属性值中也是安全的。
pub fn esc(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    for c in data.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// 按单词把文本折行到 `width` 列以内。已有的换行保留，超长的单词不拆开。
pub fn wordwrap(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for (n, line) in text.split('\n').enumerate() {
        if n > 0 {
            out.push('\n');
        }
        let mut column = 0;
        for (i, word) in line.split(' ').enumerate() {
            let len = word.chars().count();
            if i > 0 {
                if column > 0 && column + 1 + len > width {
                    out.push('\n');
                    column = 0;
                } else {
                    out.push(' ');
                    column += 1;
                }
            }
            out.push_str(word);
            column += len;
        }
    }
    out
}

/// 把数据折行并整体缩进四个空格，用于日志正文。
pub fn indent_block(text: &str) -> String {
    let wrapped = wordwrap(text, WRAP_WIDTH);
    format!("    {}", wrapped.replace('\n', "\n    "))
}
