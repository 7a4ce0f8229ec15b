//! Text extractor — pulls raw text out of an uploaded PDF under a hard time
//! budget, returning typed failures instead of hanging or panicking.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// Anything smaller cannot be a real PDF.
pub const MIN_PDF_BYTES: usize = 100;
/// Leading bytes every PDF starts with.
pub const PDF_MAGIC: &[u8] = b"%PDF";
/// Wall-clock budget for parsing one file; corrupt PDFs can otherwise spin.
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TextExtractError {
    #[error("file too small to be a valid PDF ({0} bytes)")]
    TooSmall(usize),

    #[error("invalid PDF header")]
    BadSignature,

    #[error("PDF parsing timed out after {0} seconds")]
    TimedOut(u64),

    #[error("PDF parsing returned empty text")]
    Empty,

    #[error("PDF parsing failed: {0}")]
    Parse(String),
}

/// Extracts text from a PDF buffer.
///
/// The pdf-extract crate is synchronous, so the parse runs on a blocking
/// thread under a timeout; a stuck parse costs at most the budget, never the
/// request forever. All failures come back as typed errors whose `Display`
/// is safe to surface to callers.
pub async fn extract_text(bytes: &Bytes) -> Result<String, TextExtractError> {
    if bytes.len() < MIN_PDF_BYTES {
        return Err(TextExtractError::TooSmall(bytes.len()));
    }

    if !bytes.starts_with(PDF_MAGIC) {
        return Err(TextExtractError::BadSignature);
    }

    let data = bytes.clone();
    let parse = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data));

    let text = match tokio::time::timeout(EXTRACT_TIMEOUT, parse).await {
        Err(_) => return Err(TextExtractError::TimedOut(EXTRACT_TIMEOUT.as_secs())),
        Ok(Err(join_err)) => return Err(TextExtractError::Parse(join_err.to_string())),
        Ok(Ok(Err(parse_err))) => return Err(TextExtractError::Parse(parse_err.to_string())),
        Ok(Ok(Ok(text))) => text,
    };

    if text.trim().is_empty() {
        return Err(TextExtractError::Empty);
    }

    debug!("PDF successfully parsed: {} chars", text.len());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extract_rejects_tiny_buffer() {
        let result = extract_text(&Bytes::from_static(b"%PDF")).await;
        assert!(matches!(result, Err(TextExtractError::TooSmall(4))));
    }

    #[tokio::test]
    async fn test_extract_rejects_bad_signature() {
        let bytes = Bytes::from(vec![b'x'; 200]);
        let result = extract_text(&bytes).await;
        assert!(matches!(result, Err(TextExtractError::BadSignature)));
    }

    #[tokio::test]
    async fn test_extract_rejects_corrupt_pdf() {
        let mut data = b"%PDF-1.4 ".to_vec();
        data.extend(std::iter::repeat(b'z').take(200));
        let result = extract_text(&Bytes::from(data)).await;
        assert!(matches!(
            result,
            Err(TextExtractError::Parse(_)) | Err(TextExtractError::Empty)
        ));
    }

    #[test]
    fn test_error_messages_are_presentable() {
        assert_eq!(
            TextExtractError::TimedOut(15).to_string(),
            "PDF parsing timed out after 15 seconds"
        );
        assert_eq!(
            TextExtractError::Empty.to_string(),
            "PDF parsing returned empty text"
        );
    }
}
