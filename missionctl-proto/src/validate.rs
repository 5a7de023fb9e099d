//! Field limits for task and comment payloads.
//!
//! Every check runs before anything is written, so a rejected payload never
//! leaves a partial change behind. Lengths count UTF-16 code units, so a
//! character outside the Basic Multilingual Plane (most emoji) counts twice.

use crate::comment::MAX_COMMENT_LENGTH;
use crate::message::MAX_MESSAGE_LENGTH;
use crate::task::{
    ExecutionLogEntry, MAX_ACCEPTANCE_CRITERIA_LENGTH, MAX_DESCRIPTION_LENGTH, MAX_LIST_ITEMS,
    MAX_LOG_CONTENT_LENGTH, MAX_TITLE_LENGTH, NewTask, TaskPatch,
};

/// A validated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `title`
    Title,
    /// `description`
    Description,
    /// `acceptance_criteria`
    AcceptanceCriteria,
    /// `tags`
    Tags,
    /// `required_skills`
    RequiredSkills,
    /// Execution log entry content.
    LogContent,
    /// Comment content.
    CommentContent,
    /// Agent message content.
    MessageContent,
    /// Response attached when a message is acknowledged.
    MessageResponse,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::AcceptanceCriteria => "acceptance criteria",
            Self::Tags => "tags",
            Self::RequiredSkills => "required skills",
            Self::LogContent => "log entry",
            Self::CommentContent => "comment",
            Self::MessageContent => "message",
            Self::MessageResponse => "message response",
        })
    }
}

/// A payload violated a field limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required text field is empty.
    #[error("{field} is required")]
    Empty {
        /// The offending field.
        field: Field,
    },
    /// A text field is longer than allowed.
    #[error("{field} too long (max {max} chars)")]
    TooLong {
        /// The offending field.
        field: Field,
        /// The limit in characters.
        max: usize,
    },
    /// A list field has too many items.
    #[error("too many {field} (max {max})")]
    TooMany {
        /// The offending field.
        field: Field,
        /// The limit in items.
        max: usize,
    },
}

impl ValidationError {
    /// Returns the field that failed validation.
    #[must_use]
    pub const fn field(&self) -> Field {
        match self {
            Self::Empty { field } | Self::TooLong { field, .. } | Self::TooMany { field, .. } => {
                *field
            }
        }
    }
}

/// Length as seen by browser clients, which count UTF-16 code units.
fn text_len(value: &str) -> usize {
    value.encode_utf16().count()
}

fn check_len(field: Field, value: &str, max: usize) -> Result<(), ValidationError> {
    if text_len(value) > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn check_items(field: Field, items: &[String]) -> Result<(), ValidationError> {
    if items.len() > MAX_LIST_ITEMS {
        return Err(ValidationError::TooMany {
            field,
            max: MAX_LIST_ITEMS,
        });
    }
    Ok(())
}

/// Checks a task title: non-empty and at most [`MAX_TITLE_LENGTH`] characters.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLong`].
pub fn check_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: Field::Title,
        });
    }
    check_len(Field::Title, title, MAX_TITLE_LENGTH)
}

/// Checks every limited field of a creation payload.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found, in field declaration order.
pub fn validate_new_task(task: &NewTask) -> Result<(), ValidationError> {
    check_title(&task.title)?;
    if let Some(description) = &task.description {
        check_len(Field::Description, description, MAX_DESCRIPTION_LENGTH)?;
    }
    if let Some(criteria) = &task.acceptance_criteria {
        check_len(
            Field::AcceptanceCriteria,
            criteria,
            MAX_ACCEPTANCE_CRITERIA_LENGTH,
        )?;
    }
    if let Some(tags) = &task.tags {
        check_items(Field::Tags, tags)?;
    }
    if let Some(skills) = &task.required_skills {
        check_items(Field::RequiredSkills, skills)?;
    }
    Ok(())
}

/// Checks the provided fields of a patch; absent fields are not checked.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found.
pub fn validate_patch(patch: &TaskPatch) -> Result<(), ValidationError> {
    if let Some(title) = &patch.title {
        check_title(title)?;
    }
    if let Some(description) = &patch.description {
        check_len(Field::Description, description, MAX_DESCRIPTION_LENGTH)?;
    }
    if let Some(criteria) = &patch.acceptance_criteria {
        check_len(
            Field::AcceptanceCriteria,
            criteria,
            MAX_ACCEPTANCE_CRITERIA_LENGTH,
        )?;
    }
    if let Some(tags) = &patch.tags {
        check_items(Field::Tags, tags)?;
    }
    if let Some(skills) = &patch.required_skills {
        check_items(Field::RequiredSkills, skills)?;
    }
    Ok(())
}

/// Checks an execution log entry's content length.
///
/// # Errors
///
/// Returns [`ValidationError::TooLong`] above [`MAX_LOG_CONTENT_LENGTH`].
pub fn validate_log_entry(entry: &ExecutionLogEntry) -> Result<(), ValidationError> {
    check_len(Field::LogContent, &entry.content, MAX_LOG_CONTENT_LENGTH)
}

/// Checks comment content: non-empty after trimming, bounded length.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLong`].
pub fn validate_comment(content: &str) -> Result<(), ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty {
            field: Field::CommentContent,
        });
    }
    check_len(Field::CommentContent, trimmed, MAX_COMMENT_LENGTH)
}

/// Checks message content: non-empty after trimming, bounded length.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLong`].
pub fn validate_message(content: &str) -> Result<(), ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty {
            field: Field::MessageContent,
        });
    }
    check_len(Field::MessageContent, trimmed, MAX_MESSAGE_LENGTH)
}

/// Checks the response given when acknowledging a message.
///
/// # Errors
///
/// Returns [`ValidationError::TooLong`] above [`MAX_MESSAGE_LENGTH`].
pub fn validate_message_response(response: &str) -> Result<(), ValidationError> {
    check_len(Field::MessageResponse, response, MAX_MESSAGE_LENGTH)
}
