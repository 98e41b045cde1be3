//! Text-safe transport between the orchestrator and a sandbox.
//!
//! The sandbox only accepts shell command text, so binary safety is
//! manufactured explicitly: program text goes in as base64 inside an `echo`
//! command and artifacts come back as base64 on stdout.
//!
//! Program text is first projected to ASCII by dropping every non-ASCII code
//! point. This is lossy: string literals with non-ASCII content degrade
//! silently.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Errors raised while decoding data read back from a sandbox.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The payload is not valid base64 after alphabet filtering.
    #[error("artifact payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The payload decoded to zero bytes.
    #[error("artifact payload is empty")]
    Empty,
}

/// Drops every non-ASCII character from `source`.
pub fn ascii_projection(source: &str) -> String {
    source.chars().filter(char::is_ascii).collect()
}

/// Encodes arbitrary bytes with the standard base64 alphabet.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Projects program text to ASCII and encodes it for the command channel.
pub fn encode_program(source: &str) -> String {
    encode(ascii_projection(source).as_bytes())
}

/// Quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command that decodes `encoded` and writes it to `path` inside the sandbox.
///
/// `encoded` must come from [`encode`] or [`encode_program`]; the base64
/// alphabet never needs quoting.
pub fn write_file_command(encoded: &str, path: &str) -> String {
    format!("echo '{encoded}' | base64 -d > {}", shell_quote(path))
}

/// Command that prints the base64 encoding of `path` on a single line.
pub fn read_file_command(path: &str) -> String {
    format!("cat {} | base64 | tr -d '\\n'", shell_quote(path))
}

/// Keeps only characters of the standard base64 alphabet.
///
/// Removes line wrapping, carriage returns, and any stray shell noise that
/// made it onto stdout.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect()
}

/// Decodes base64 read back from a sandbox into the original bytes.
///
/// # Errors
///
/// Returns [`TransportError::Decode`] when the filtered payload is not valid
/// base64 and [`TransportError::Empty`] when it decodes to nothing.
pub fn decode(raw: &str) -> Result<Vec<u8>, TransportError> {
    let bytes = STANDARD.decode(sanitize(raw))?;
    if bytes.is_empty() {
        return Err(TransportError::Empty);
    }
    Ok(bytes)
}
