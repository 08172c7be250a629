//! Common types used throughout catch-sync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-generated identifier of a catch record.
///
/// Codes are the primary key of the local store and never change once a
/// record has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordCode(String);

impl RecordCode {
    /// Number of leading letters in a generated code.
    const LETTERS: usize = 2;
    /// Number of trailing digits in a generated code.
    const DIGITS: usize = 4;

    /// Create a RecordCode from a string.
    ///
    /// # Errors
    /// - Returns error if the code is empty or contains characters that are
    ///   unsafe in file names and multipart part names
    pub fn new(code: impl Into<String>) -> crate::Result<Self> {
        let code = code.into();
        if code.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Record code cannot be empty".to_string(),
            ));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidInput(format!(
                "Record code contains invalid characters: {}",
                code
            )));
        }
        Ok(Self(code))
    }

    /// Generate a fresh random code such as `AB1234`.
    ///
    /// Uniqueness is not guaranteed here; callers rely on the store rejecting
    /// duplicates and generate again on collision.
    pub fn generate() -> Self {
        let mut code = String::with_capacity(Self::LETTERS + Self::DIGITS);
        for _ in 0..Self::LETTERS {
            let offset = (rand::random::<u32>() % 26) as u8;
            code.push(char::from(b'A' + offset));
        }
        for _ in 0..Self::DIGITS {
            let digit = (rand::random::<u32>() % 10) as u8;
            code.push(char::from(b'0' + digit));
        }
        Self(code)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of the two backend APIs a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendVariant {
    /// Variant A: offshore and boat categories.
    #[serde(alias = "a", alias = "variant-a")]
    Offshore,
    /// Variant B: bank and shore categories.
    #[serde(alias = "b", alias = "variant-b")]
    Shore,
}

impl BackendVariant {
    /// Short label used in logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            BackendVariant::Offshore => "variant-a",
            BackendVariant::Shore => "variant-b",
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the three media assets attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaField {
    CardImage,
    FishImage,
    FishVideo,
}

impl MediaField {
    /// All media fields in upload order.
    pub const ALL: [MediaField; 3] = [
        MediaField::CardImage,
        MediaField::FishImage,
        MediaField::FishVideo,
    ];

    /// Field name as used in the schema and as the multipart part name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaField::CardImage => "card_image",
            MediaField::FishImage => "fish_image",
            MediaField::FishVideo => "fish_video",
        }
    }
}

impl fmt::Display for MediaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
