// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 异常路由模块
//!
//! 路由器在宿主运行时上注册三个钩子：错误处理器、未捕获异常处理器和收尾函数。
//! 提示类错误记入调试日志后继续执行，其余错误提升为异常；
//! 未捕获的异常会取出当前调试日志，按调试模式选择生产或开发渲染器输出报告。
//!
//! 收尾函数一旦注册就无法移除，注销时只是关闭 `active` 标志让它变成空操作；
//! 错误与异常处理器的恢复也只有在此后没有别人注册时才是准确的。

use std::{
    collections::HashMap,
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use log::{debug, error, info, warn};

use crate::{
    config::Settings,
    debug_log::DebugLog,
    exception::{ErrorLevel, Exception, ExceptionKind},
    message::Message,
    param::{
        DEV_RENDERER, FATAL_PREFIXES, PROBLEM, PRODUCTION_RENDERER, SETTING_DEV_HANDLER,
        SETTING_PRODUCTION_HANDLER,
    },
    render::{render_dev, render_production, Renderer},
    runtime::{ErrorHandler, ExceptionHandler, Handled, Runtime},
    stack,
};

/// 错误钩子在调用栈中的名称，渲染包装异常时据此去掉拦截产生的帧
pub(crate) const HANDLE_ERROR_FRAME: &str = concat!(module_path!(), "::ErrorRouter::handle_error");

/// 报告的输出目的地
pub type Output = Arc<Mutex<dyn Write + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Unregistered,
    Registered,
}

pub struct ErrorRouter {
    log: DebugLog,
    settings: Option<Arc<Settings>>,
    runtime: Arc<Runtime>,
    output: Output,
    renderers: Mutex<HashMap<String, Renderer>>,
    active: AtomicBool,
    shutdown_registered: AtomicBool,
}

impl ErrorRouter {
    /// 创建路由器，内置 `production` 与 `dev` 两个渲染器。`settings` 为空时总是使用开发渲染器。
    pub fn new(
        log: DebugLog,
        settings: Option<Arc<Settings>>,
        runtime: Arc<Runtime>,
        output: Output,
    ) -> Arc<Self> {
        let mut renderers: HashMap<String, Renderer> = HashMap::new();
        renderers.insert(PRODUCTION_RENDERER.to_string(), Arc::new(render_production));
        renderers.insert(DEV_RENDERER.to_string(), Arc::new(render_dev));
        Arc::new(Self {
            log,
            settings,
            runtime,
            output,
            renderers: Mutex::new(renderers),
            active: AtomicBool::new(false),
            shutdown_registered: AtomicBool::new(false),
        })
    }

    /// 以名称注册渲染器，可通过 `errorHandlerProduction` / `errorHandlerDev` 设置选用。
    pub fn register_renderer(&self, name: &str, renderer: Renderer) {
        self.renderers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), renderer);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RouterState {
        if self.is_active() {
            RouterState::Registered
        } else {
            RouterState::Unregistered
        }
    }

    /// 在宿主运行时上安装错误、异常与收尾三个钩子。收尾钩子只安装一次。
    pub fn register_handlers(self: &Arc<Self>) {
        self.active.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(self);
        let on_error: ErrorHandler = Arc::new(
            move |level: ErrorLevel, message: &str, file: Option<&str>, line: Option<u32>| {
                match weak.upgrade() {
                    Some(router) => router.handle_error(level, message, file, line),
                    None if level.is_notice() => {
                        warn!("异常路由器已释放，{}: {}", level, message);
                        Ok(())
                    }
                    None => Err(Exception::from_error(level, message, file, line)),
                }
            },
        );
        self.runtime.set_error_handler(on_error);

        let weak = Arc::downgrade(self);
        let on_exception: ExceptionHandler = Arc::new(move |exc: Exception| match weak.upgrade() {
            Some(router) => router.handle_exception(exc),
            None if exc.is_exit() => Handled::Exit,
            None => {
                error!("异常路由器已释放，未捕获的异常无人处理：{}", exc);
                Handled::Unhandled
            }
        });
        self.runtime.set_exception_handler(on_exception);

        if !self.shutdown_registered.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(self);
            self.runtime.register_shutdown_function(move || {
                if let Some(router) = weak.upgrade() {
                    router.handle_shutdown();
                }
            });
        }
        debug!("异常路由器已注册");
    }

    /// 注销钩子。收尾钩子仍会执行，但不再有任何效果。
    pub fn unregister_handlers(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.runtime.restore_exception_handler();
        self.runtime.restore_error_handler();
        debug!("异常路由器已注销");
    }

    /// 错误钩子：提示级别记入日志后继续执行，其余级别提升为异常返回。
    #[inline(never)]
    pub fn handle_error(
        &self,
        level: ErrorLevel,
        message: &str,
        file: Option<&str>,
        line: Option<u32>,
    ) -> Result<(), Exception> {
        if level.is_notice() {
            self.log.add_message(Message::new(
                "Notice",
                message,
                stack::capture(0),
                PROBLEM,
                None,
            ));
            return Ok(());
        }
        Err(Exception::from_error(level, message, file, line))
    }

    /// 未捕获异常钩子：取出调试日志并交给所选的渲染器，结果写入输出。
    pub fn handle_exception(&self, exc: Exception) -> Handled {
        if exc.is_exit() {
            debug!("收到退出请求，静默结束");
            return Handled::Exit;
        }
        let log = self.log.get_log(true);
        let (name, renderer) = self.select_renderer();
        info!("未捕获的异常{}交由渲染器{}处理", exc.name(), name);

        let report = renderer(&exc, log.as_slice());
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = output.write_all(report.as_bytes()) {
            error!("无法写出错误报告：{}", e);
        } else if let Err(e) = output.flush() {
            error!("无法刷新错误报告输出：{}", e);
        }
        Handled::Rendered
    }

    /// 收尾钩子：若最近发生过致命错误，合成一个异常并按未捕获异常处理。
    pub fn handle_shutdown(&self) -> Option<Handled> {
        if !self.is_active() {
            return None;
        }
        let fatal = self.runtime.last_fatal_error()?;
        let prefix = FATAL_PREFIXES.get(&fatal.level).copied().unwrap_or("");
        let exc = Exception::with_trace(
            ExceptionKind::Error(fatal.level),
            format!("{}{}", prefix, fatal.message),
            fatal.file.as_deref(),
            fatal.line,
            Vec::new(),
        );
        Some(self.handle_exception(exc))
    }

    fn select_renderer(&self) -> (String, Renderer) {
        let production = self.settings.as_ref().map_or(false, |s| !s.debug());
        let (setting, fallback) = if production {
            (SETTING_PRODUCTION_HANDLER, PRODUCTION_RENDERER)
        } else {
            (SETTING_DEV_HANDLER, DEV_RENDERER)
        };
        let name = self
            .settings
            .as_ref()
            .and_then(|s| s.get_str(setting))
            .unwrap_or(fallback);

        let renderers = self.renderers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(renderer) = renderers.get(name) {
            return (name.to_string(), Arc::clone(renderer));
        }
        warn!("未注册的渲染器{}，改用{}", name, fallback);
        let renderer: Renderer = match renderers.get(fallback) {
            Some(renderer) => Arc::clone(renderer),
            None if production => Arc::new(render_production),
            None => Arc::new(render_dev),
        };
        (fallback.to_string(), renderer)
    }
}
