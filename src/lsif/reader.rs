//! Line-oriented reader for gzipped LSIF streams. Decompression and JSON
//! parsing are synchronous; callers on an async path wrap this in
//! `spawn_blocking`.

use std::io::{BufRead, BufReader, Read};

use flate2::read::GzDecoder;

use super::types::Element;
use super::ImportError;

/// Iterate the elements of a gzipped LSIF stream, pairing each with its
/// 1-based line number for error reporting.
pub fn elements<R: Read>(input: R) -> ElementIter<BufReader<GzDecoder<R>>> {
    ElementIter {
        lines: BufReader::new(GzDecoder::new(input)).lines(),
        line: 0,
    }
}

pub struct ElementIter<B> {
    lines: std::io::Lines<B>,
    line: u64,
}

impl<B: BufRead> Iterator for ElementIter<B> {
    type Item = Result<(u64, Element), ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(err) => return Some(Err(err.into())),
            };
            self.line += 1;

            // Blank trailing lines are common in indexer output.
            if raw.trim().is_empty() {
                continue;
            }

            return match serde_json::from_str::<Element>(&raw) {
                Ok(element) => Some(Ok((self.line, element))),
                Err(err) => Some(Err(ImportError::MalformedInput {
                    line: self.line,
                    message: err.to_string(),
                })),
            };
        }
    }
}

/// Cheap validation pass used by the upload endpoint: every line must parse
/// as an element and the stream must open with a supported `metaData` vertex.
pub fn validate<R: Read>(input: R) -> Result<(), ImportError> {
    let mut saw_meta = false;

    for item in elements(input) {
        let (line, element) = item?;
        match element {
            Element::Vertex(super::types::Vertex::MetaData { version, .. }) => {
                if !version_supported(&version) {
                    return Err(ImportError::UnsupportedVersion { version });
                }
                saw_meta = true;
            }
            _ if !saw_meta => {
                return Err(ImportError::MalformedInput {
                    line,
                    message: "metaData vertex must precede all other elements".into(),
                });
            }
            _ => {}
        }
    }

    if !saw_meta {
        return Err(ImportError::MalformedInput {
            line: 0,
            message: "stream contains no metaData vertex".into(),
        });
    }

    Ok(())
}

pub fn version_supported(version: &str) -> bool {
    version.starts_with("0.4.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsif::testing::gzip_lines;

    #[test]
    fn reads_elements_with_line_numbers() {
        let bytes = gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///r"}"#,
            "",
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///r/a.ts"}"#,
        ]);

        let parsed: Vec<_> = elements(&bytes[..]).collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, 1);
        assert_eq!(parsed[1].0, 3);
    }

    #[test]
    fn validate_rejects_missing_meta_data() {
        let bytes = gzip_lines(&[r#"{"id":2,"type":"vertex","label":"document","uri":"file:///r/a.ts"}"#]);
        let err = validate(&bytes[..]).unwrap_err();
        assert!(matches!(err, ImportError::MalformedInput { line: 1, .. }));
    }

    #[test]
    fn validate_rejects_unsupported_version() {
        let bytes = gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.5.0","projectRoot":"file:///r"}"#,
        ]);
        assert!(matches!(
            validate(&bytes[..]).unwrap_err(),
            ImportError::UnsupportedVersion { .. }
        ));
    }

    #[test]
    fn validate_rejects_garbage_lines() {
        let bytes = gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///r"}"#,
            "not json",
        ]);
        assert!(matches!(
            validate(&bytes[..]).unwrap_err(),
            ImportError::MalformedInput { line: 2, .. }
        ));
    }
}
