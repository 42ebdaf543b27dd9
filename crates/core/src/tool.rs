//! Tool types and quality tiers for generation jobs.
//!
//! A job's tool type decides which vendor capabilities matter for it — in
//! particular whether results are normally delivered inline or through a
//! long-running remote job that must be polled.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// ToolType
// ---------------------------------------------------------------------------

/// The kind of content a generation job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    Image,
    Video,
    Voice,
    Script,
    ImageToVideo,
    VideoToVideo,
    Avatar,
    Edit,
}

impl ToolType {
    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Image => "image",
            ToolType::Video => "video",
            ToolType::Voice => "voice",
            ToolType::Script => "script",
            ToolType::ImageToVideo => "image_to_video",
            ToolType::VideoToVideo => "video_to_video",
            ToolType::Avatar => "avatar",
            ToolType::Edit => "edit",
        }
    }

    /// Parse from a stored string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "image" => Ok(ToolType::Image),
            "video" => Ok(ToolType::Video),
            "voice" => Ok(ToolType::Voice),
            "script" => Ok(ToolType::Script),
            "image_to_video" => Ok(ToolType::ImageToVideo),
            "video_to_video" => Ok(ToolType::VideoToVideo),
            "avatar" => Ok(ToolType::Avatar),
            "edit" => Ok(ToolType::Edit),
            other => Err(CoreError::Validation(format!(
                "Unknown tool type: '{other}'"
            ))),
        }
    }

    /// Whether results for this tool are normally produced by a long-running
    /// remote job rather than returned inline. Video-class tools go through
    /// the async execution path when the vendor can be polled.
    pub fn is_video_class(&self) -> bool {
        matches!(
            self,
            ToolType::Video | ToolType::ImageToVideo | ToolType::VideoToVideo | ToolType::Avatar
        )
    }

    /// Whether this tool requires at least one reference media URL as input.
    pub fn requires_reference_media(&self) -> bool {
        matches!(self, ToolType::ImageToVideo | ToolType::VideoToVideo)
    }
}

// ---------------------------------------------------------------------------
// QualityTier
// ---------------------------------------------------------------------------

/// Quality tier of a generation pass: a cheap/fast preview or the expensive
/// final render over the same prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Preview,
    Final,
}

impl QualityTier {
    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Preview => "preview",
            QualityTier::Final => "final",
        }
    }

    /// Parse from a stored string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "preview" => Ok(QualityTier::Preview),
            "final" => Ok(QualityTier::Final),
            other => Err(CoreError::Validation(format!(
                "Unknown quality tier: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
