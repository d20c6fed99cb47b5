pub mod config;
pub mod context;
pub mod debug_log;
pub mod exception;
pub mod message;
pub mod param;
pub mod render;
pub mod router;
pub mod runtime;
pub mod session;
pub mod stack;
pub mod util;

pub use config::{Settings, SettingsError};
pub use context::Tuffy;
pub use debug_log::DebugLog;
pub use exception::{DebugError, ErrorLevel, Exception, ExceptionKind};
pub use message::{Debuggable, Message, Payload};
pub use router::{ErrorRouter, Output, RouterState};
pub use runtime::{Handled, Outcome, Runtime};
pub use session::{FileSession, MemorySession, SessionStore};
pub use stack::{RawFrame, StackFrame};
pub use util::{esc, HtmlBuilder};
