// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示程序
//!
//! 以一次模拟请求演示调试日志与异常路由器的协作：
//! - `ok`：记录一次查询并正常结束
//! - `notice`：触发一个提示，请求继续执行
//! - `error`：触发一个警告，被提升为异常后渲染报告
//! - `panic`：请求崩溃，在收尾阶段作为致命错误渲染
//! - `exit`：主动结束请求，没有任何输出
//! - `redirect`：重定向前把日志存入会话，下一次请求再取回

use std::{
    env,
    io::{self, Write},
    path::Path,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use log::{error, info};

use tuffy::{
    ErrorLevel, Exception, FileSession, Outcome, Output, Runtime, SessionStore, Settings, Tuffy,
};

/// 会话文件所在目录
const SESSION_DIR: &str = "target/sessions";

fn main() -> ExitCode {
    // 1. 日志系统由外部 YAML 配置，生产环境的事故报告写入单独的文件
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
    }

    // 2. 载入设置，失败时退回默认设置
    let mut settings = match Settings::from_toml("config/settings.toml") {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}，使用默认设置", e);
            let mut settings = Settings::new();
            settings.configure("appName", "tuffy-demo");
            settings
        }
    };
    if let Ok(flag) = env::var("TUFFY_DEBUG") {
        settings.configure("debug", flag == "1" || flag == "true");
    }
    info!("设置已载入");

    Runtime::install_panic_hook();

    let scenario = env::args().nth(1).unwrap_or_else(|| "ok".to_string());
    let output: Output = Arc::new(Mutex::new(io::stdout()));
    let tuffy = match Tuffy::init(settings.clone(), Arc::clone(&output)) {
        Ok(tuffy) => tuffy,
        Err(e) => {
            error!("框架初始化失败：{}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = match scenario.as_str() {
        "redirect" => redirect(&tuffy, settings, output),
        name => tuffy.run(|t| request(t, name)),
    };
    info!("请求结束：{:?}", outcome);

    match outcome {
        Outcome::Completed | Outcome::Exited => ExitCode::SUCCESS,
        Outcome::Handled | Outcome::Failed => ExitCode::FAILURE,
    }
}

fn request(tuffy: &Tuffy, scenario: &str) -> Result<(), Exception> {
    let query = tuffy.debug("Query", "SELECT id, total FROM orders WHERE user_id = 7");
    tuffy.complete(query)?;

    match scenario {
        "ok" => {
            let mut out = io::stdout();
            writeln!(out, "<p>3 orders</p>")?;
        }
        "notice" => {
            tuffy.trigger_error(ErrorLevel::UserNotice, "order 12 has no shipping address")?;
            tuffy.warn("Cart", "recalculated totals after notice");
        }
        "error" => {
            tuffy.trigger_error(ErrorLevel::UserWarning, "division by zero in discount")?;
        }
        "panic" => {
            let totals: Vec<u32> = Vec::new();
            let third = totals[3];
            tuffy.debug("Third order", third.to_string());
        }
        "exit" => tuffy.exit_script()?,
        other => {
            return Err(Exception::new(
                "UnknownScenario",
                format!("no demo request named {}", other),
            ))
        }
    }
    Ok(())
}

/// 第一次请求在重定向前保存日志；第二次请求用新的上下文取回日志，再以一个异常展示完整报告。
fn redirect(first: &Tuffy, settings: Settings, output: Output) -> Outcome {
    let dir = Path::new(SESSION_DIR);
    let outcome = first.run(|t| {
        let mut session = FileSession::open(dir, "demo")?;
        session.set("user", serde_json::json!({ "id": 7, "name": "ada" }));
        t.debug("Login", "user 7 signed in");
        t.save_before_redirect("/account", &mut session)?;
        session.save()?;
        t.exit_script()
    });
    if outcome != Outcome::Exited {
        return outcome;
    }

    let second = match Tuffy::init(settings, output) {
        Ok(tuffy) => tuffy,
        Err(e) => {
            error!("框架初始化失败：{}", e);
            return Outcome::Failed;
        }
    };
    second.run(|t| {
        let mut session = FileSession::open(dir, "demo")?;
        t.start_session(&mut session)?;
        session.save()?;
        Err(Exception::new("AccountLocked", "user 7 must reset the password"))
    })
}
