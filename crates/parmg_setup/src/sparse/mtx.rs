use crate::sparse::error::MtxError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MmField {
    Integer,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MmSymmetry {
    General,
    Symmetric,
}

/// Unassembled triples read from a MatrixMarket coordinate file,
/// 0-based, with `symmetric` storage mirrored to both triangles.
#[derive(Debug, Clone)]
pub struct MtxTriples {
    pub nrows: usize,
    pub ncols: usize,
    pub entries: Vec<(usize, usize, f64)>,
}

/// Load unassembled triples from a MatrixMarket `.mtx` file (coordinate
/// format).
///
/// Supports:
/// - banner: `%%MatrixMarket matrix coordinate {integer|real}
///   {general|symmetric}`
/// - 1-based indices in the file, converted to 0-based internally.
///
/// Duplicate coordinates are legal; assembly combines them by addition.
pub fn load_triples_file(path: impl AsRef<Path>) -> Result<MtxTriples, MtxError> {
    let f = File::open(path.as_ref())?;
    load_triples_from_reader(BufReader::new(f))
}

/// Same as [`load_triples_file`], but reads from any buffered reader
/// (useful for tests).
pub fn load_triples_from_reader<R: BufRead>(reader: R) -> Result<MtxTriples, MtxError> {
    let mut lines = reader.lines().enumerate();

    // Header (first non-empty line)
    let (header_line_no, header) = loop {
        match lines.next() {
            None => return Err(MtxError::InvalidBanner("empty input".to_string())),
            Some((i, line)) => {
                let line = line?;
                let t = line.trim();
                if t.is_empty() {
                    continue;
                }
                // tolerate BOM
                let t = t.trim_start_matches('\u{feff}');
                break (i + 1, t.to_string());
            }
        }
    };

    let tokens: Vec<&str> = header.split_whitespace().collect();
    if tokens.len() != 5 {
        return Err(MtxError::InvalidBanner(format!(
            "expected 5 tokens, got {} at line {}: {:?}",
            tokens.len(),
            header_line_no,
            header
        )));
    }
    if tokens[0] != "%%MatrixMarket" {
        return Err(MtxError::InvalidBanner(format!(
            "missing %%MatrixMarket at line {}: {}",
            header_line_no, header
        )));
    }
    if tokens[1].to_ascii_lowercase() != "matrix" || tokens[2].to_ascii_lowercase() != "coordinate"
    {
        return Err(MtxError::UnsupportedType(format!(
            "only 'matrix coordinate' is supported, got '{}' '{}' (line {})",
            tokens[1], tokens[2], header_line_no
        )));
    }
    let field = match tokens[3].to_ascii_lowercase().as_str() {
        "integer" => MmField::Integer,
        "real" => MmField::Real,
        other => {
            return Err(MtxError::UnsupportedType(format!(
                "only 'integer' and 'real' fields are supported, got '{other}' (line {header_line_no})"
            )));
        }
    };
    let symmetry = match tokens[4].to_ascii_lowercase().as_str() {
        "general" => MmSymmetry::General,
        "symmetric" => MmSymmetry::Symmetric,
        other => {
            return Err(MtxError::UnsupportedType(format!(
                "only 'general' and 'symmetric' are supported, got '{other}' (line {header_line_no})"
            )));
        }
    };

    // Size line (skip comments/empty)
    let (size_line_no, size_line) = loop {
        match lines.next() {
            None => return Err(MtxError::InvalidSizeLine("missing size line".to_string())),
            Some((i, line)) => {
                let line = line?;
                let t = line.trim();
                if t.is_empty() || t.starts_with('%') {
                    continue;
                }
                break (i + 1, t.to_string());
            }
        }
    };

    let parts: Vec<&str> = size_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(MtxError::InvalidSizeLine(format!(
            "expected 'nrows ncols nnz' at line {size_line_no}: {size_line}"
        )));
    }
    let nrows: usize = parts[0]
        .parse()
        .map_err(|_| MtxError::InvalidSizeLine(size_line.clone()))?;
    let ncols: usize = parts[1]
        .parse()
        .map_err(|_| MtxError::InvalidSizeLine(size_line.clone()))?;
    let nnz: usize = parts[2]
        .parse()
        .map_err(|_| MtxError::InvalidSizeLine(size_line.clone()))?;

    let mut entries = Vec::with_capacity(nnz);
    for (i, line) in lines {
        let line = line?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('%') {
            continue;
        }
        let line_no = i + 1;
        let mut it = t.split_whitespace();
        let (Some(rs), Some(cs), Some(vs)) = (it.next(), it.next(), it.next()) else {
            return Err(MtxError::InvalidEntry {
                line: line_no,
                reason: format!("expected 'row col value', got: {t}"),
            });
        };
        let row: usize = rs.parse().map_err(|_| MtxError::InvalidEntry {
            line: line_no,
            reason: format!("bad row index: {rs}"),
        })?;
        let col: usize = cs.parse().map_err(|_| MtxError::InvalidEntry {
            line: line_no,
            reason: format!("bad column index: {cs}"),
        })?;
        let value: f64 = match field {
            MmField::Real => vs.parse().map_err(|_| MtxError::InvalidEntry {
                line: line_no,
                reason: format!("bad real value: {vs}"),
            })?,
            MmField::Integer => vs.parse::<i64>().map_err(|_| MtxError::InvalidEntry {
                line: line_no,
                reason: format!("bad integer value: {vs}"),
            })? as f64,
        };
        if row == 0 || col == 0 || row > nrows || col > ncols {
            return Err(MtxError::InvalidEntry {
                line: line_no,
                reason: format!("index ({row}, {col}) outside 1..=({nrows}, {ncols})"),
            });
        }
        entries.push((row - 1, col - 1, value));
        if symmetry == MmSymmetry::Symmetric && row != col {
            entries.push((col - 1, row - 1, value));
        }
    }

    Ok(MtxTriples { nrows, ncols, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_general_coordinate() {
        let src = "%%MatrixMarket matrix coordinate real general\n\
                   % a comment\n\
                   2 2 3\n\
                   1 1 2.0\n\
                   1 2 -1.0\n\
                   2 2 2.0\n";
        let m = load_triples_from_reader(Cursor::new(src)).unwrap();
        assert_eq!((m.nrows, m.ncols), (2, 2));
        assert_eq!(m.entries, vec![(0, 0, 2.0), (0, 1, -1.0), (1, 1, 2.0)]);
    }

    #[test]
    fn mirrors_symmetric_storage() {
        let src = "%%MatrixMarket matrix coordinate real symmetric\n\
                   2 2 2\n\
                   1 1 2.0\n\
                   2 1 -1.0\n";
        let m = load_triples_from_reader(Cursor::new(src)).unwrap();
        assert_eq!(m.entries, vec![(0, 0, 2.0), (1, 0, -1.0), (0, 1, -1.0)]);
    }

    #[test]
    fn rejects_pattern_field() {
        let src = "%%MatrixMarket matrix coordinate pattern general\n2 2 1\n1 1\n";
        assert!(matches!(
            load_triples_from_reader(Cursor::new(src)),
            Err(MtxError::UnsupportedType(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_entry() {
        let src = "%%MatrixMarket matrix coordinate real general\n2 2 1\n3 1 1.0\n";
        assert!(matches!(
            load_triples_from_reader(Cursor::new(src)),
            Err(MtxError::InvalidEntry { .. })
        ));
    }
}
