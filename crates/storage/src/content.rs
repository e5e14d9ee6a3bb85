//! Content-type determination for created blobs.
//!
//! The validator is consulted once per blob creation, over the spooled
//! copy of the payload, so sniffing never consumes the caller's stream.

use crate::error::{StorageError, StorageResult};
use depot_core::OCTET_STREAM;
use std::io::Read;

/// Bytes inspected when sniffing content.
const SNIFF_LEN: usize = 512;

/// Per-format content-type overrides, keyed by blob name.
///
/// Formats use this to force types their clients require regardless of
/// content, e.g. checksums served as plain text.
pub trait MimeRulesSource: Send + Sync {
    /// An override content type for the given blob name, if any.
    fn content_type_for(&self, name: &str) -> Option<String>;
}

/// Rules source with no overrides.
pub struct NoopMimeRules;

impl MimeRulesSource for NoopMimeRules {
    fn content_type_for(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Determines the effective content type of a blob.
pub trait ContentValidator: Send + Sync {
    /// Determine the content type for a payload.
    ///
    /// `content` is a fresh reader over the payload; implementations may
    /// read as much of it as they need. Under `strict`, a declared type
    /// contradicting the content fails instead of being trusted.
    fn determine_content_type(
        &self,
        strict: bool,
        content: &mut dyn Read,
        mime_rules: &dyn MimeRulesSource,
        name: Option<&str>,
        declared_content_type: Option<&str>,
    ) -> StorageResult<String>;
}

/// Default validator: format rules, then magic bytes, then the file
/// extension, then `application/octet-stream`.
pub struct DefaultContentValidator;

impl ContentValidator for DefaultContentValidator {
    fn determine_content_type(
        &self,
        strict: bool,
        content: &mut dyn Read,
        mime_rules: &dyn MimeRulesSource,
        name: Option<&str>,
        declared_content_type: Option<&str>,
    ) -> StorageResult<String> {
        if let Some(name) = name {
            if let Some(forced) = mime_rules.content_type_for(name) {
                return Ok(forced);
            }
        }

        let mut head = [0u8; SNIFF_LEN];
        let mut filled = 0;
        while filled < SNIFF_LEN {
            let n = content.read(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let sniffed = sniff(&head[..filled]);

        if let Some(declared) = declared_content_type {
            if strict {
                if let Some(detected) = &sniffed {
                    if detected != declared {
                        return Err(StorageError::ContentTypeMismatch {
                            declared: declared.to_string(),
                            detected: detected.clone(),
                        });
                    }
                }
            }
            return Ok(declared.to_string());
        }

        if let Some(detected) = sniffed {
            return Ok(detected);
        }
        if let Some(by_extension) = name.and_then(extension_content_type) {
            return Ok(by_extension.to_string());
        }
        Ok(OCTET_STREAM.to_string())
    }
}

/// Identify well-known payloads by their leading bytes.
fn sniff(head: &[u8]) -> Option<String> {
    let detected = if head.starts_with(&[0x1f, 0x8b]) {
        "application/gzip"
    } else if head.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        "image/png"
    } else if head.starts_with(b"<?xml") {
        "application/xml"
    } else {
        return None;
    };
    Some(detected.to_string())
}

fn extension_content_type(name: &str) -> Option<&'static str> {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext)?;
    match extension {
        "xml" | "pom" => Some("application/xml"),
        "json" => Some("application/json"),
        "jar" | "war" | "ear" => Some("application/java-archive"),
        "zip" | "nupkg" => Some("application/zip"),
        "gz" | "tgz" => Some("application/gzip"),
        "tar" => Some("application/x-tar"),
        "txt" | "md5" | "sha1" | "sha256" | "sha512" | "asc" => Some("text/plain"),
        "html" => Some("text/html"),
        "png" => Some("image/png"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn determine(
        strict: bool,
        payload: &[u8],
        name: Option<&str>,
        declared: Option<&str>,
    ) -> StorageResult<String> {
        let mut reader = payload;
        DefaultContentValidator.determine_content_type(
            strict,
            &mut reader,
            &NoopMimeRules,
            name,
            declared,
        )
    }

    #[test]
    fn test_sniffs_magic_bytes() {
        assert_eq!(
            determine(true, &[0x1f, 0x8b, 0x08], None, None).unwrap(),
            "application/gzip"
        );
        assert_eq!(
            determine(true, b"PK\x03\x04rest", None, None).unwrap(),
            "application/zip"
        );
        assert_eq!(
            determine(true, b"<?xml version=\"1.0\"?>", None, None).unwrap(),
            "application/xml"
        );
    }

    #[test]
    fn test_falls_back_to_extension_then_octet_stream() {
        assert_eq!(
            determine(true, b"not sniffable", Some("lib/example.jar"), None).unwrap(),
            "application/java-archive"
        );
        assert_eq!(
            determine(true, b"not sniffable", Some("noext"), None).unwrap(),
            OCTET_STREAM
        );
    }

    #[test]
    fn test_declared_type_trusted_when_consistent() {
        assert_eq!(
            determine(true, b"plain text", None, Some("text/plain")).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn test_strict_rejects_contradicted_declaration() {
        let err = determine(true, &[0x1f, 0x8b, 0x08], None, Some("text/plain")).unwrap_err();
        assert!(matches!(err, StorageError::ContentTypeMismatch { .. }));

        // Lenient validation trusts the declaration.
        assert_eq!(
            determine(false, &[0x1f, 0x8b, 0x08], None, Some("text/plain")).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn test_mime_rules_win() {
        struct ChecksumRules;
        impl MimeRulesSource for ChecksumRules {
            fn content_type_for(&self, name: &str) -> Option<String> {
                name.ends_with(".sha1").then(|| "text/plain".to_string())
            }
        }

        let mut reader: &[u8] = &[0x1f, 0x8b];
        let content_type = DefaultContentValidator
            .determine_content_type(
                true,
                &mut reader,
                &ChecksumRules,
                Some("lib.jar.sha1"),
                None,
            )
            .unwrap();
        assert_eq!(content_type, "text/plain");
    }
}
