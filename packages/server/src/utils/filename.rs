/// Why a requested filename was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum FilenameError {
    Empty,
    TooLong,
    /// `/` or `\`.
    ContainsPathSeparator,
    PathTraversal,
    Hidden,
    /// Includes NUL and CR/LF.
    ControlCharacter,
}

impl FilenameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "Filename cannot be empty",
            Self::TooLong => "Filename exceeds 255 bytes",
            Self::ContainsPathSeparator => "Invalid filename: path separators are not allowed",
            Self::PathTraversal => "Invalid filename: '..' is not allowed",
            Self::Hidden => "Invalid filename: hidden files (starting with '.') are not allowed",
            Self::ControlCharacter => "Invalid filename: control characters are not allowed",
        }
    }
}

const MAX_FILENAME_BYTES: usize = 255;

/// Accept a single path component naming an issued output.
pub fn validate_flat_filename(filename: &str) -> Result<&str, FilenameError> {
    if filename.trim().is_empty() {
        return Err(FilenameError::Empty);
    }
    if filename.len() > MAX_FILENAME_BYTES {
        return Err(FilenameError::TooLong);
    }
    if filename.chars().any(|c| c.is_control()) {
        return Err(FilenameError::ControlCharacter);
    }
    if filename.contains(['/', '\\']) {
        return Err(FilenameError::ContainsPathSeparator);
    }
    if filename == ".." {
        return Err(FilenameError::PathTraversal);
    }
    if filename.starts_with('.') {
        return Err(FilenameError::Hidden);
    }
    Ok(filename)
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .filter(|c| c.is_ascii_graphic() && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let fallback = if fallback.is_empty() {
        "download".to_string()
    } else {
        fallback
    };

    let encoded: String = filename
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();

    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
