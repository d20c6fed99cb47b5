// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 应用设置保存在一张 TOML 表中，名称中的 `.` 可以逐层访问嵌套表，
//! 例如 `database.dsn` 读取 `[database]` 表中的 `dsn`。

use std::{fmt, fs, io};

use log::{debug, warn};
use toml::{Table, Value};

use crate::param::{SETTING_APP_NAME, SETTING_DEBUG, SETTING_USE_SESSIONS};

/// 读取或校验设置失败的原因。
#[derive(Debug)]
pub enum SettingsError {
    /// 配置文件无法读取
    Io(io::Error),
    /// 配置文件不是合法的 TOML
    Parse(toml::de::Error),
    /// 缺少必需的 `appName` 设置
    MissingAppName,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "Couldn't read settings file: {}", e),
            SettingsError::Parse(e) => write!(f, "Settings file is not valid TOML: {}", e),
            SettingsError::MissingAppName => write!(f, "You must define the appName setting"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<io::Error> for SettingsError {
    fn from(e: io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<toml::de::Error> for SettingsError {
    fn from(e: toml::de::Error) -> Self {
        SettingsError::Parse(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    values: Table,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    /// 默认设置：关闭调试模式，启用会话。
    pub fn new() -> Self {
        let mut values = Table::new();
        values.insert(SETTING_DEBUG.to_string(), Value::Boolean(false));
        values.insert(SETTING_USE_SESSIONS.to_string(), Value::Boolean(true));
        Self { values }
    }

    /// 在默认设置之上合并 TOML 文件中的设置。
    pub fn from_toml(filename: &str) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(filename)?;
        let settings = Self::from_toml_str(&text)?;
        debug!("已从{}载入{}项设置", filename, settings.values.len());
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let table: Table = toml::from_str(text)?;
        let mut settings = Self::new();
        settings.merge(table);
        Ok(settings)
    }

    /// 逐项覆盖顶层设置。
    pub fn merge(&mut self, table: Table) {
        for (name, value) in table {
            self.values.insert(name, value);
        }
    }

    /// 修改单个顶层设置。
    pub fn configure(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// 读取设置，名称中的 `.` 表示逐层访问嵌套表。
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut parts = name.split('.');
        let mut cursor = self.values.get(parts.next()?)?;
        for part in parts {
            cursor = cursor.as_table()?.get(part)?;
        }
        Some(cursor)
    }

    /// 布尔设置，缺失或类型不符时为 `false`。
    pub fn get_bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Value::Boolean(b)) => *b,
            Some(other) => {
                warn!("设置{}的值{}不是布尔值，按false处理", name, other);
                false
            }
            None => false,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn debug(&self) -> bool {
        self.get_bool(SETTING_DEBUG)
    }

    pub fn use_sessions(&self) -> bool {
        self.get_bool(SETTING_USE_SESSIONS)
    }

    pub fn app_name(&self) -> Option<&str> {
        self.get_str(SETTING_APP_NAME).filter(|s| !s.is_empty())
    }

    /// 框架启动前的校验：必须设置 `appName`。
    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.app_name() {
            Some(_) => Ok(()),
            None => Err(SettingsError::MissingAppName),
        }
    }
}
