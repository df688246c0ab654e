//! 对话消息
//!
//! PromptMessage 为纯文本消息（system / user / assistant）；ImagePromptMessage 为带 base64 图片的用户消息，
//! 图片与格式两个序列始终等长。ChatMessage 统一两者，供历史记录与补全接口使用。

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息构造错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("image count ({images}) does not match image format count ({formats})")]
    ImageCountMismatch { images: usize, formats: usize },

    #[error("image prompt messages must have role user, got {0}")]
    InvalidRole(Role),

    #[error("unsupported image extension: {0}")]
    UnsupportedImageExtension(String),
}

/// 单条文本消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// 图片格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    /// MIME 类型，如 image/png
    pub fn media_type(&self) -> String {
        format!("image/{}", self.as_str())
    }

    /// 由文件扩展名推断格式（不区分大小写，jpg 视为 jpeg）
    pub fn from_extension(ext: &str) -> Result<Self, MessageError> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(MessageError::UnsupportedImageExtension(other.to_string())),
        }
    }
}

/// 带图片的用户消息：images 为 base64 编码数据，image_formats 与之一一对应
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawImagePromptMessage")]
pub struct ImagePromptMessage {
    role: Role,
    content: String,
    images: Vec<String>,
    image_formats: Vec<ImageFormat>,
}

#[derive(Deserialize)]
struct RawImagePromptMessage {
    #[serde(default = "default_image_role")]
    role: Role,
    content: String,
    images: Vec<String>,
    image_formats: Vec<ImageFormat>,
}

fn default_image_role() -> Role {
    Role::User
}

impl TryFrom<RawImagePromptMessage> for ImagePromptMessage {
    type Error = MessageError;

    fn try_from(raw: RawImagePromptMessage) -> Result<Self, Self::Error> {
        if raw.role != Role::User {
            return Err(MessageError::InvalidRole(raw.role));
        }
        Self::new(raw.content, raw.images, raw.image_formats)
    }
}

impl ImagePromptMessage {
    /// 由已编码的 base64 图片构造；两个序列长度不一致时返回错误
    pub fn new(
        content: impl Into<String>,
        images: Vec<String>,
        image_formats: Vec<ImageFormat>,
    ) -> Result<Self, MessageError> {
        if images.len() != image_formats.len() {
            return Err(MessageError::ImageCountMismatch {
                images: images.len(),
                formats: image_formats.len(),
            });
        }
        Ok(Self {
            role: Role::User,
            content: content.into(),
            images,
            image_formats,
        })
    }

    /// 由原始图片字节构造，内部做 base64 编码
    pub fn from_image_bytes<B: AsRef<[u8]>>(
        content: impl Into<String>,
        images: impl IntoIterator<Item = (B, ImageFormat)>,
    ) -> Self {
        let (images, image_formats) = images
            .into_iter()
            .map(|(bytes, fmt)| (STANDARD.encode(bytes.as_ref()), fmt))
            .unzip();
        Self {
            role: Role::User,
            content: content.into(),
            images,
            image_formats,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn image_formats(&self) -> &[ImageFormat] {
        &self.image_formats
    }

    /// (base64 数据, 格式) 对
    pub fn iter_images(&self) -> impl Iterator<Item = (&str, ImageFormat)> {
        self.images
            .iter()
            .map(String::as_str)
            .zip(self.image_formats.iter().copied())
    }
}

/// 历史记录中的一条消息：文本或带图片
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatMessage {
    // 顺序重要：untagged 反序列化先尝试带 images 的结构
    Image(ImagePromptMessage),
    Text(PromptMessage),
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::Text(PromptMessage::user(content))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Text(PromptMessage::assistant(content))
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::Text(PromptMessage::system(content))
    }

    pub fn role(&self) -> Role {
        match self {
            ChatMessage::Text(m) => m.role,
            ChatMessage::Image(m) => m.role,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::Text(m) => &m.content,
            ChatMessage::Image(m) => &m.content,
        }
    }

    pub fn has_images(&self) -> bool {
        matches!(self, ChatMessage::Image(m) if !m.images.is_empty())
    }

    /// 返回替换了文本内容的副本（图片保持不变）
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        let content = content.into();
        match self {
            ChatMessage::Text(m) => ChatMessage::Text(PromptMessage::new(m.role, content)),
            ChatMessage::Image(m) => ChatMessage::Image(ImagePromptMessage {
                content,
                ..m.clone()
            }),
        }
    }
}

/// 纯文本默认视为 user 消息
impl From<&str> for ChatMessage {
    fn from(content: &str) -> Self {
        ChatMessage::user(content)
    }
}

impl From<String> for ChatMessage {
    fn from(content: String) -> Self {
        ChatMessage::user(content)
    }
}

impl From<PromptMessage> for ChatMessage {
    fn from(msg: PromptMessage) -> Self {
        ChatMessage::Text(msg)
    }
}

impl From<ImagePromptMessage> for ChatMessage {
    fn from(msg: ImagePromptMessage) -> Self {
        ChatMessage::Image(msg)
    }
}
