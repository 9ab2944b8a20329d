pub mod canonicalize;
pub mod correlator;
pub mod importer;
pub mod reader;
pub mod types;

use thiserror::Error;

/// Conversion failures. Everything except `Io` means the payload itself is
/// bad and retrying the job cannot help.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed LSIF input at line {line}: {message}")]
    MalformedInput { line: u64, message: String },

    #[error("unsupported LSIF version {version}")]
    UnsupportedVersion { version: String },

    #[error("dangling reference to id {id} at line {line}")]
    DanglingReference { id: String, line: u64 },

    #[error("inconsistent graph: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ImportError {
    /// True when the input itself is at fault and a retry would fail the
    /// same way.
    pub fn is_invalid_payload(&self) -> bool {
        !matches!(self, ImportError::Io(_))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    pub(crate) fn gzip_lines(lines: &[&str]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        for line in lines {
            writeln!(enc, "{}", line).unwrap();
        }
        enc.finish().unwrap()
    }

    /// The single-file scenario: an interface method `foo` declared at
    /// line 1 cols 4-7, implemented at lines 5 and 9 (same span), used at
    /// lines 13 and 16 (cols 2-5). All five ranges share one reference
    /// result.
    pub(crate) fn interface_scenario() -> Vec<u8> {
        gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///repo"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///repo/src/index.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"resultSet"}"#,
            r#"{"id":10,"type":"vertex","label":"range","start":{"line":1,"character":4},"end":{"line":1,"character":7}}"#,
            r#"{"id":11,"type":"vertex","label":"range","start":{"line":5,"character":4},"end":{"line":5,"character":7}}"#,
            r#"{"id":12,"type":"vertex","label":"range","start":{"line":9,"character":4},"end":{"line":9,"character":7}}"#,
            r#"{"id":13,"type":"vertex","label":"range","start":{"line":13,"character":2},"end":{"line":13,"character":5}}"#,
            r#"{"id":14,"type":"vertex","label":"range","start":{"line":16,"character":2},"end":{"line":16,"character":5}}"#,
            r#"{"id":20,"type":"vertex","label":"definitionResult"}"#,
            r#"{"id":21,"type":"vertex","label":"referenceResult"}"#,
            r#"{"id":22,"type":"vertex","label":"hoverResult","result":{"contents":{"language":"ts","value":"foo(): void"}}}"#,
            r#"{"id":30,"type":"edge","label":"contains","outV":2,"inVs":[10,11,12,13,14]}"#,
            r#"{"id":31,"type":"edge","label":"next","outV":10,"inV":3}"#,
            r#"{"id":32,"type":"edge","label":"next","outV":11,"inV":3}"#,
            r#"{"id":33,"type":"edge","label":"next","outV":12,"inV":3}"#,
            r#"{"id":34,"type":"edge","label":"next","outV":13,"inV":3}"#,
            r#"{"id":35,"type":"edge","label":"next","outV":14,"inV":3}"#,
            r#"{"id":40,"type":"edge","label":"textDocument/definition","outV":3,"inV":20}"#,
            r#"{"id":41,"type":"edge","label":"textDocument/references","outV":3,"inV":21}"#,
            r#"{"id":42,"type":"edge","label":"textDocument/hover","outV":3,"inV":22}"#,
            r#"{"id":50,"type":"edge","label":"item","outV":20,"inVs":[11,12],"document":2}"#,
            r#"{"id":51,"type":"edge","label":"item","outV":21,"inVs":[10,11,12],"document":2,"property":"definitions"}"#,
            r#"{"id":52,"type":"edge","label":"item","outV":21,"inVs":[13,14],"document":2,"property":"references"}"#,
        ])
    }

    /// A dump exporting `identifier` from package `(npm, name, version)`:
    /// a definition at src/lib.ts 0:9-0:10 and a local use at 3:2-3:3,
    /// both on one reference result.
    pub(crate) fn exporting_dump(identifier: &str, name: &str, version: &str) -> Vec<u8> {
        let moniker = format!(
            r#"{{"id":8,"type":"vertex","label":"moniker","scheme":"npm","identifier":"{}","kind":"export"}}"#,
            identifier
        );
        let package = format!(
            r#"{{"id":9,"type":"vertex","label":"packageInformation","name":"{}","version":"{}"}}"#,
            name, version
        );
        gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///repo"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///repo/src/lib.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"range","start":{"line":0,"character":9},"end":{"line":0,"character":10}}"#,
            r#"{"id":4,"type":"vertex","label":"range","start":{"line":3,"character":2},"end":{"line":3,"character":3}}"#,
            r#"{"id":5,"type":"vertex","label":"resultSet"}"#,
            r#"{"id":6,"type":"vertex","label":"definitionResult"}"#,
            r#"{"id":7,"type":"vertex","label":"referenceResult"}"#,
            &moniker,
            &package,
            r#"{"id":30,"type":"edge","label":"contains","outV":2,"inVs":[3,4]}"#,
            r#"{"id":31,"type":"edge","label":"next","outV":3,"inV":5}"#,
            r#"{"id":32,"type":"edge","label":"next","outV":4,"inV":5}"#,
            r#"{"id":33,"type":"edge","label":"textDocument/definition","outV":5,"inV":6}"#,
            r#"{"id":34,"type":"edge","label":"textDocument/references","outV":5,"inV":7}"#,
            r#"{"id":35,"type":"edge","label":"item","outV":6,"inVs":[3],"document":2}"#,
            r#"{"id":36,"type":"edge","label":"item","outV":7,"inVs":[3],"document":2,"property":"definitions"}"#,
            r#"{"id":37,"type":"edge","label":"item","outV":7,"inVs":[4],"document":2,"property":"references"}"#,
            r#"{"id":38,"type":"edge","label":"moniker","outV":5,"inV":8}"#,
            r#"{"id":39,"type":"edge","label":"packageInformation","outV":8,"inV":9}"#,
        ])
    }

    /// A dump importing `identifier` from package `(npm, name, version)`,
    /// with one use at src/main.ts 2:4-2:5.
    pub(crate) fn importing_dump(identifier: &str, name: &str, version: &str) -> Vec<u8> {
        let moniker = format!(
            r#"{{"id":5,"type":"vertex","label":"moniker","scheme":"npm","identifier":"{}","kind":"import"}}"#,
            identifier
        );
        let package = format!(
            r#"{{"id":6,"type":"vertex","label":"packageInformation","name":"{}","version":"{}"}}"#,
            name, version
        );
        gzip_lines(&[
            r#"{"id":1,"type":"vertex","label":"metaData","version":"0.4.3","projectRoot":"file:///repo"}"#,
            r#"{"id":2,"type":"vertex","label":"document","uri":"file:///repo/src/main.ts"}"#,
            r#"{"id":3,"type":"vertex","label":"range","start":{"line":2,"character":4},"end":{"line":2,"character":5}}"#,
            r#"{"id":4,"type":"vertex","label":"resultSet"}"#,
            &moniker,
            &package,
            r#"{"id":7,"type":"vertex","label":"referenceResult"}"#,
            r#"{"id":30,"type":"edge","label":"contains","outV":2,"inVs":[3]}"#,
            r#"{"id":31,"type":"edge","label":"next","outV":3,"inV":4}"#,
            r#"{"id":32,"type":"edge","label":"textDocument/references","outV":4,"inV":7}"#,
            r#"{"id":33,"type":"edge","label":"item","outV":7,"inVs":[3],"document":2,"property":"references"}"#,
            r#"{"id":34,"type":"edge","label":"moniker","outV":4,"inV":5}"#,
            r#"{"id":35,"type":"edge","label":"packageInformation","outV":5,"inV":6}"#,
        ])
    }
}
