//! Meeting URL input

use std::io::{BufRead, Write};

use bf_core::error::ConfigError;

const PROMPT: &str = "Enter the meeting URL (must start with https://): ";

/// Accept a meeting URL if it is an `https://` URL
pub fn validate_meeting_url(raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim();
    match url.strip_prefix("https://") {
        Some(rest) if !rest.is_empty() => Ok(url.to_string()),
        _ => Err(ConfigError::Invalid(format!(
            "meeting URL must start with https:// (got {:?})",
            url
        ))),
    }
}

/// Ask for a meeting URL until a valid one is entered
///
/// End of input is a `ConfigError`.
pub fn prompt_meeting_url<R, W>(mut input: R, mut output: W) -> Result<String, ConfigError>
where
    R: BufRead,
    W: Write,
{
    let io_err = |e: std::io::Error| ConfigError::Invalid(format!("Failed to read meeting URL: {}", e));

    loop {
        write!(output, "{}", PROMPT).map_err(io_err)?;
        output.flush().map_err(io_err)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(io_err)? == 0 {
            return Err(ConfigError::MissingField("meeting URL".into()));
        }

        match validate_meeting_url(&line) {
            Ok(url) => return Ok(url),
            Err(e) => {
                tracing::warn!("Invalid input received: {}", e);
                writeln!(output, "{}", e).map_err(io_err)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_meeting_url() {
        assert_eq!(
            validate_meeting_url("  https://meet.google.com/abc \n").unwrap(),
            "https://meet.google.com/abc"
        );
        assert!(validate_meeting_url("http://meet.google.com/abc").is_err());
        assert!(validate_meeting_url("https://").is_err());
        assert!(validate_meeting_url("").is_err());
    }

    #[test]
    fn test_prompt_reprompts_until_valid() {
        let input = b"meet.google.com/abc\nhttp://zoom.us/j/1\nhttps://zoom.us/j/1\n";
        let mut output = Vec::new();

        let url = prompt_meeting_url(&input[..], &mut output).unwrap();
        assert_eq!(url, "https://zoom.us/j/1");

        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches(PROMPT).count(), 3);
        assert!(shown.contains("must start with https://"));
    }

    #[test]
    fn test_prompt_eof() {
        let mut output = Vec::new();
        let err = prompt_meeting_url(&b"not-a-url\n"[..], &mut output).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }
}
