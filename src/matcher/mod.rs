use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Tries a declared list of alternative patterns, first match wins, as
/// described for `LogGroup.patterns`. A pattern only counts as a match if
/// its capture count (including the whole-match group) equals
/// `expected_matches + 1`.
pub struct LineMatcher {
    patterns: Vec<Regex>,
    expected_matches: usize,
    filename_pattern: Option<Regex>,
}

impl LineMatcher {
    pub fn compile(
        patterns: &[String],
        expected_matches: usize,
        filename_match_re: Option<&str>,
    ) -> Result<Self, MatchError> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let filename_pattern = filename_match_re.map(Regex::new).transpose()?;
        Ok(Self {
            patterns,
            expected_matches,
            filename_pattern,
        })
    }

    /// Try each pattern in order against `line`; return the captured tuple
    /// of the first whose group count satisfies `expected_matches + 1`.
    /// `captures[0]` is the whole line.
    pub fn match_line(&self, line: &str) -> Option<Vec<String>> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.captures(line) {
                if caps.len() == self.expected_matches + 1 {
                    return Some(
                        caps.iter()
                            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                            .collect(),
                    );
                }
            }
        }
        None
    }

    /// Groups of `filename_match_re`, excluding the whole-match group, to be
    /// appended to every tuple emitted for this file. Evaluated once when a
    /// tailer starts on a given filename.
    pub fn match_filename(&self, filename: &str) -> Vec<String> {
        let Some(pattern) = &self.filename_pattern else {
            return Vec::new();
        };
        let Some(caps) = pattern.captures(filename) else {
            return Vec::new();
        };
        caps.iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect()
    }
}
