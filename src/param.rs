// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 调试设施常量模块
//!
//! 该模块集中定义了调试日志与异常路由器共享的常量，包括：
//! - 日志消息标志位与栈帧哨兵名称。
//! - 会话存储键名与设置项名称。
//! - 致命错误类型到可读前缀的映射表。

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::exception::ErrorLevel;

/// 消息标志位：表示该消息代表一个警告或错误，渲染时应当突出显示。
pub const PROBLEM: u32 = 1;

/// 规范化栈回溯最底层帧的函数名
pub const MAIN_FRAME: &str = "[main]";

/// 文件与行号均未知时（平台内部代码）显示的位置描述
pub const INTERNAL_CODE: &str = "[internal code]";

/// 会话中保存未输出调试日志时使用的键后缀，完整键为 `<appName>:debugLeftovers`
pub const LEFTOVERS_SUFFIX: &str = ":debugLeftovers";

/// 日志数据自动换行的列宽
pub const WRAP_WIDTH: usize = 96;

/// 生产环境渲染器的内置注册名
pub const PRODUCTION_RENDERER: &str = "production";

/// 开发环境渲染器的内置注册名
pub const DEV_RENDERER: &str = "dev";

/// 生产环境下接收完整事故报告的日志 target，由 log4rs 配置路由到运维侧的输出
pub const INCIDENT_TARGET: &str = "tuffy::incident";

/// 设置项：是否开启调试模式
pub const SETTING_DEBUG: &str = "debug";

/// 设置项：是否启用会话
pub const SETTING_USE_SESSIONS: &str = "useSessions";

/// 设置项：应用名称，用于构造会话键
pub const SETTING_APP_NAME: &str = "appName";

/// 设置项：覆盖生产环境渲染器的名称
pub const SETTING_PRODUCTION_HANDLER: &str = "errorHandlerProduction";

/// 设置项：覆盖开发环境渲染器的名称
pub const SETTING_DEV_HANDLER: &str = "errorHandlerDev";

lazy_static! {
    /// 致命错误类型与其报告前缀的映射表。
    ///
    /// 进程结束时合成异常会用该前缀标注错误类型，不在表中的类型不加前缀。
    pub static ref FATAL_PREFIXES: HashMap<ErrorLevel, &'static str> = {
        let mut map = HashMap::new();
        map.insert(ErrorLevel::Error, "Fatal error: ");
        map.insert(ErrorLevel::CoreError, "Core error: ");
        map.insert(ErrorLevel::CompileError, "Compile error: ");
        map.insert(ErrorLevel::Parse, "Parse error: ");
        map
    };
}

/// 根据应用名构造保存调试日志残留的会话键。
pub fn leftovers_key(app_name: &str) -> String {
    format!("{}{}", app_name, LEFTOVERS_SUFFIX)
}
