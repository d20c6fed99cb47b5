// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 调试日志模块
//!
//! 一次请求内按时间顺序追加的消息序列。日志句柄可以廉价克隆，
//! 所有克隆共享同一份内容，便于在钩子闭包与应用代码之间传递。

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::{exception::DebugError, message::Message, session::SessionStore};

/// 调试日志的共享句柄。
#[derive(Debug, Clone, Default)]
pub struct DebugLog {
    entries: Arc<Mutex<Vec<Message>>>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    // 请求可能在持锁时崩溃，收尾阶段仍需要读取日志，因此忽略锁中毒
    fn entries(&self) -> MutexGuard<'_, Vec<Message>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加一条消息，返回其 1 起始的下标，供 [`DebugLog::complete_event`] 使用。
    pub fn add_message(&self, msg: Message) -> usize {
        let mut entries = self.entries();
        entries.push(msg);
        entries.len()
    }

    /// 以当前时间完成指定下标的消息。
    pub fn complete_event(&self, index: usize) -> Result<(), DebugError> {
        self.complete_event_at(index, None)
    }

    /// 以给定时间完成指定下标的消息。
    pub fn complete_event_at(&self, index: usize, time: Option<f64>) -> Result<(), DebugError> {
        let mut entries = self.entries();
        let msg = index
            .checked_sub(1)
            .and_then(|i| entries.get_mut(i))
            .ok_or(DebugError::NoSuchEvent(index))?;
        msg.complete(time)
    }

    /// 返回当前日志；`remove` 为真时同时清空日志。
    pub fn get_log(&self, remove: bool) -> Vec<Message> {
        let mut entries = self.entries();
        if remove {
            std::mem::take(&mut *entries)
        } else {
            entries.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// 把完整日志（不清空）写入会话的 `key` 下。
    pub fn save_in_session(
        &self,
        store: &mut dyn SessionStore,
        key: &str,
    ) -> Result<(), DebugError> {
        let value = serde_json::to_value(&*self.entries())?;
        store.set(key, value);
        debug!("调试日志已保存到会话{}的{}键", store.id(), key);
        Ok(())
    }

    /// 若会话中存有 `key`，将其中保存的消息插入到当前日志之前，并删除该键。
    ///
    /// 返回是否恢复了内容。保存的消息不满足时间约束时返回错误，当前日志与会话保持不变。
    pub fn restore_from_session(
        &self,
        store: &mut dyn SessionStore,
        key: &str,
    ) -> Result<bool, DebugError> {
        let Some(value) = store.get(key) else {
            return Ok(false);
        };
        let mut saved: Vec<Message> = serde_json::from_value(value)?;
        for msg in &saved {
            msg.validate()?;
        }
        let count = saved.len();
        {
            let mut entries = self.entries();
            saved.append(&mut entries);
            *entries = saved;
        }
        store.delete(key);
        debug!("从会话{}恢复了{}条调试消息", store.id(), count);
        Ok(true)
    }
}
