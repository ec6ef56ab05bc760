//! Clan/player tag normalization.
//!
//! Every tag entering the pipeline goes through [`fmt_tag`] before it is used
//! as a fetch path component or a database key.

use std::fmt;

/// Characters the API actually issues in tags.
const TAG_CHARSET: &[u8] = b"PYLQGRJCUV0289";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTagError {
    pub tag: String,
}

impl fmt::Display for InvalidTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid tag", self.tag)
    }
}

impl std::error::Error for InvalidTagError {}

/// Normalize a tag: uppercase, ensure the leading `#`, validate the charset.
pub fn fmt_tag(tag: &str) -> Result<String, InvalidTagError> {
    let upper = tag.trim().to_uppercase();
    let tag = if upper.starts_with('#') {
        upper
    } else {
        format!("#{}", upper)
    };
    let body = &tag.as_bytes()[1..];
    if body.is_empty() || !body.iter().all(|b| TAG_CHARSET.contains(b)) {
        return Err(InvalidTagError { tag });
    }
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_and_uppercases() {
        assert_eq!(fmt_tag("#8ull0ulu").unwrap(), "#8ULL0ULU");
        assert_eq!(fmt_tag("2R9LQRLY").unwrap(), "#2R9LQRLY");
    }

    #[test]
    fn test_rejects_bad_charset() {
        // 'I' and 'O' are never issued
        assert!(fmt_tag("#8ILL0ULU").is_err());
        assert!(fmt_tag("#").is_err());
        assert!(fmt_tag("").is_err());
    }

    #[test]
    fn test_error_carries_normalized_tag() {
        let err = fmt_tag("bad-tag").unwrap_err();
        assert_eq!(err.tag, "#BAD-TAG");
    }
}
