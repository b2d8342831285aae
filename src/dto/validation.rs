//! Validation helpers for DTOs.

use validator::ValidationError;

/// Most rounds a room may be configured with.
pub const MAX_ROUNDS: u32 = 20;
/// Shortest accepted round, in seconds.
pub const MIN_ROUND_SECONDS: u32 = 10;
/// Longest accepted round, in seconds.
pub const MAX_ROUND_SECONDS: u32 = 600;
/// Most categories a room may be configured with.
pub const MAX_CATEGORIES: usize = 12;
/// Longest accepted category label, in characters.
pub const MAX_CATEGORY_CHARS: usize = 40;
/// Longest accepted answer, in characters.
pub const MAX_ANSWER_CHARS: usize = 80;

fn error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates the category list of a room: 1 to 12 non-blank labels of at most 40 characters.
///
/// # Examples
///
/// ```ignore
/// validate_categories(&["Animal".into(), "Fruit".into()]) // Ok
/// validate_categories(&[])                                // Err - empty
/// validate_categories(&["  ".into()])                     // Err - blank
/// ```
pub fn validate_categories(categories: &[String]) -> Result<(), ValidationError> {
    if categories.is_empty() || categories.len() > MAX_CATEGORIES {
        return Err(error(
            "categories_count",
            format!(
                "Between 1 and {MAX_CATEGORIES} categories are required (got {})",
                categories.len()
            ),
        ));
    }

    for category in categories {
        let trimmed = category.trim();
        if trimmed.is_empty() {
            return Err(error("category_blank", "Categories must not be blank".into()));
        }
        if trimmed.chars().count() > MAX_CATEGORY_CHARS {
            return Err(error(
                "category_length",
                format!("Category `{trimmed}` is longer than {MAX_CATEGORY_CHARS} characters"),
            ));
        }
    }

    Ok(())
}

/// Validates the round count against [`MAX_ROUNDS`].
pub fn validate_rounds(rounds: u32) -> Result<(), ValidationError> {
    if (1..=MAX_ROUNDS).contains(&rounds) {
        Ok(())
    } else {
        Err(error(
            "rounds_total_range",
            format!("Rounds must be between 1 and {MAX_ROUNDS} (got {rounds})"),
        ))
    }
}

/// Validates the round duration against [`MIN_ROUND_SECONDS`] and [`MAX_ROUND_SECONDS`].
pub fn validate_round_seconds(seconds: u32) -> Result<(), ValidationError> {
    if (MIN_ROUND_SECONDS..=MAX_ROUND_SECONDS).contains(&seconds) {
        Ok(())
    } else {
        Err(error(
            "time_per_round_range",
            format!(
                "Round time must be between {MIN_ROUND_SECONDS} and {MAX_ROUND_SECONDS} seconds (got {seconds})"
            ),
        ))
    }
}

/// Validates a single answer text against [`MAX_ANSWER_CHARS`].
pub fn validate_answer_text(text: &str) -> Result<(), ValidationError> {
    let length = text.trim().chars().count();
    if length > MAX_ANSWER_CHARS {
        return Err(error(
            "answer_length",
            format!("Answers must be at most {MAX_ANSWER_CHARS} characters (got {length})"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_categories_valid() {
        assert!(validate_categories(&["Animal".into()]).is_ok());
        assert!(validate_categories(&["Animal".into(), " Fruit ".into(), "City".into()]).is_ok());
    }

    #[test]
    fn test_validate_categories_invalid() {
        assert!(validate_categories(&[]).is_err());
        assert!(validate_categories(&["Animal".into(), "   ".into()]).is_err());
        assert!(validate_categories(&["x".repeat(41)]).is_err());
        let thirteen: Vec<String> = (0..13).map(|i| format!("Category {i}")).collect();
        assert!(validate_categories(&thirteen).is_err());
    }

    #[test]
    fn test_validate_round_limits() {
        assert!(validate_rounds(1).is_ok());
        assert!(validate_rounds(20).is_ok());
        assert!(validate_rounds(0).is_err());
        assert!(validate_rounds(21).is_err());
        assert!(validate_round_seconds(10).is_ok());
        assert!(validate_round_seconds(600).is_ok());
        assert!(validate_round_seconds(9).is_err());
        assert!(validate_round_seconds(601).is_err());
    }

    #[test]
    fn test_validate_answer_text() {
        assert!(validate_answer_text("Lion").is_ok());
        assert!(validate_answer_text(&"a".repeat(81)).is_err());
    }
}
