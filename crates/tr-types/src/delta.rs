//! Delta frame decoding
//!
//! A `D` frame describes the new payload relative to the previous one as a
//! tab-separated list of operations:
//!
//! - `+text` inserts form-encoded `text`
//! - `-n` skips `n` characters of the previous payload
//! - `=n` copies `n` characters of the previous payload
//!
//! Offsets count Unicode scalar values, not bytes.

use crate::error::TrError;

/// Apply a delta to the previous payload, producing the new payload
pub fn apply_delta(previous: &str, delta: &str) -> Result<String, TrError> {
    let source: Vec<char> = previous.chars().collect();
    let mut cursor = 0usize;
    let mut result = String::with_capacity(previous.len());

    for op in delta.split('\t').filter(|op| !op.is_empty()) {
        let mut chars = op.chars();
        let sign = chars.next().unwrap_or('+');
        let arg = chars.as_str();

        match sign {
            '+' => {
                let spaced = arg.replace('+', " ");
                let text = urlencoding::decode(&spaced)
                    .map_err(|e| TrError::protocol(format!("bad delta insert: {}", e)))?;
                result.push_str(text.trim());
            }
            '-' | '=' => {
                let count: usize = arg
                    .parse()
                    .map_err(|_| TrError::protocol(format!("bad delta count: {}", op)))?;
                let end = cursor
                    .checked_add(count)
                    .filter(|end| *end <= source.len())
                    .ok_or_else(|| {
                        TrError::protocol(format!(
                            "delta overruns previous payload ({} + {} > {})",
                            cursor,
                            count,
                            source.len()
                        ))
                    })?;
                if sign == '=' {
                    result.extend(&source[cursor..end]);
                }
                cursor = end;
            }
            _ => return Err(TrError::protocol(format!("unknown delta op: {}", op))),
        }
    }

    Ok(result)
}
