//! 提示消息模型：文本消息与带图片的用户消息

pub mod message;

pub use message::{ChatMessage, ImageFormat, ImagePromptMessage, MessageError, PromptMessage, Role};
