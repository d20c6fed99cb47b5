// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 会话存储模块
//!
//! 调试日志跨越重定向时需要借助会话保存。这里定义了最小的键值存储接口，
//! 以及进程内与基于文件的两种实现。

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde_json::Value;

use crate::message::Debuggable;

/// 以字符串为键、JSON 为值的会话存储。
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore {
    /// 会话标识
    fn id(&self) -> String;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
    fn delete(&mut self, key: &str) -> Option<Value>;
}

/// 进程内的会话存储
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    id: String,
    values: BTreeMap<String, Value>,
}

impl MemorySession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

impl Debuggable for MemorySession {
    fn to_debug(&self) -> String {
        dump_values(&self.values)
    }
}

/// 基于文件的会话存储，每个会话对应目录下的一个 `<id>.json`。
///
/// 修改只保存在内存中，调用 [`FileSession::save`] 后才写回磁盘。
#[derive(Debug, Clone)]
pub struct FileSession {
    id: String,
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl FileSession {
    /// 打开会话。文件不存在时得到一个空会话；文件内容损坏时丢弃并记录警告。
    ///
    /// 会话标识只能是单个文件名，含路径分隔符或 `..` 的标识会被拒绝。
    pub fn open(dir: &Path, id: &str) -> io::Result<Self> {
        if !is_valid_id(id) {
            warn!("拒绝非法的会话标识：{:?}", id);
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid session id: {:?}", id),
            ));
        }
        let path = dir.join(format!("{}.json", id));
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(values) => values,
                Err(e) => {
                    warn!("会话文件{}无法解析，将被重置：{}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        debug!("会话{}已载入，共{}个键", id, values.len());
        Ok(Self {
            id: id.to_string(),
            path,
            values,
        })
    }

    /// 将会话写回磁盘
    pub fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string(&self.values)?;
        fs::write(&self.path, text)?;
        debug!("会话{}已写入{}", self.id, self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

impl Debuggable for FileSession {
    fn to_debug(&self) -> String {
        dump_values(&self.values)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\', '\0']) && !id.contains("..")
}

fn dump_values(values: &BTreeMap<String, Value>) -> String {
    serde_json::to_string_pretty(values).unwrap_or_else(|_| format!("{:?}", values))
}
