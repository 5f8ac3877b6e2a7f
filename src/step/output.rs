// Captured process output, split into per-line output steps

use serde::Serialize;

/// Which captured stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One non-empty line of captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Text with escape sequences decoded
    pub text: String,
    /// The line as captured
    pub raw: String,
    /// Escape sequences present in the raw line, in order of first appearance
    pub escapes: Vec<String>,
    pub stream: OutputStream,
}

/// Split captured output into lines, dropping empty ones
pub fn segment(captured: &str, stream: OutputStream) -> Vec<OutputLine> {
    captured
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (text, escapes) = decode_escapes(line);
            OutputLine {
                text,
                raw: line.to_string(),
                escapes,
                stream,
            }
        })
        .collect()
}

/// Decode C escape sequences written literally into a line.
///
/// Returns the decoded text and the distinct escapes found (e.g. `\n`).
/// Unknown escapes are left as they are.
pub fn decode_escapes(raw: &str) -> (String, Vec<String>) {
    let mut text = String::with_capacity(raw.len());
    let mut escapes: Vec<String> = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        let decoded = match chars.peek() {
            Some('n') => Some('\n'),
            Some('t') => Some('\t'),
            Some('r') => Some('\r'),
            Some('0') => Some('\0'),
            Some('\\') => Some('\\'),
            Some('"') => Some('"'),
            _ => None,
        };
        match (decoded, chars.next()) {
            (Some(d), Some(escaped)) => {
                text.push(d);
                let escape = format!("\\{}", escaped);
                if !escapes.contains(&escape) {
                    escapes.push(escape);
                }
            }
            (_, Some(other)) => {
                text.push('\\');
                text.push(other);
            }
            (_, None) => text.push('\\'),
        }
    }

    (text, escapes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_drops_empty_lines() {
        let lines = segment("sum = 6\n\nok\r\n", OutputStream::Stdout);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "sum = 6");
        assert_eq!(lines[1].raw, "ok");
        assert!(lines[1].escapes.is_empty());
    }

    #[test]
    fn test_decode_reports_escapes() {
        let (text, escapes) = decode_escapes(r"a\tb\nc\td");
        assert_eq!(text, "a\tb\nc\td");
        assert_eq!(escapes, vec![r"\t", r"\n"]);
    }

    #[test]
    fn test_unknown_and_trailing_backslash() {
        let (text, escapes) = decode_escapes(r"path\q end\");
        assert_eq!(text, r"path\q end\");
        assert!(escapes.is_empty());

        let (text, escapes) = decode_escapes(r#"say \"hi\" \\ done"#);
        assert_eq!(text, r#"say "hi" \ done"#);
        assert_eq!(escapes, vec![r#"\""#, r"\\"]);
    }
}
