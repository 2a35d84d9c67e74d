//! Parser for the tagged `KEY: value` format exchanged with the generator.
//!
//! The format is deliberately boring: one field per line, an uppercase key,
//! a colon, a value. Keys may arrive in any order with arbitrary
//! surrounding whitespace; unknown keys are ignored; repeated keys
//! accumulate (used for `STEP` and `FINDING` groups). Anything else about
//! the input is strict: a missing required field is the caller's cue to
//! fall back, never to error.

/// A parsed tagged document: ordered `(KEY, value)` pairs.
#[derive(Debug, Default)]
pub struct TaggedDoc {
    fields: Vec<(String, String)>,
}

impl TaggedDoc {
    /// Parse tagged lines out of generator output. Lines that do not look
    /// like `KEY: value` (uppercase key of letters/underscores) are skipped,
    /// which also skips code fences and prose the generator may wrap around
    /// the fields.
    pub fn parse(text: &str) -> Self {
        let mut fields = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty()
                || !key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c == '_')
            {
                continue;
            }
            fields.push((key.to_string(), value.trim().to_string()));
        }
        Self { fields }
    }

    /// First value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a repeated key, in order
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// First value parsed as a float, clamped to 0.0-1.0
    pub fn get_unit_f64(&self, key: &str) -> Option<f64> {
        self.get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.clamp(0.0, 1.0))
    }

    /// First value parsed as a boolean (`true/false/yes/no`)
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reordered_and_padded_fields() {
        let doc = TaggedDoc::parse(
            "  CONFIDENCE:  0.7 \n\nSTRATEGY: broad sweep\nignore this prose line\nSTEP: web | rust | 5",
        );
        assert_eq!(doc.get("STRATEGY"), Some("broad sweep"));
        assert_eq!(doc.get_unit_f64("CONFIDENCE"), Some(0.7));
        assert_eq!(doc.get_all("STEP"), vec!["web | rust | 5"]);
    }

    #[test]
    fn repeated_keys_accumulate_in_order() {
        let doc = TaggedDoc::parse("STEP: a\nSTEP: b\nSTEP: c");
        assert_eq!(doc.get_all("STEP"), vec!["a", "b", "c"]);
        assert_eq!(doc.get("STEP"), Some("a"));
    }

    #[test]
    fn non_tagged_lines_are_skipped() {
        let doc = TaggedDoc::parse("```\nHere is my plan:\nkey: lowercase is prose\n```");
        assert!(doc.is_empty());
    }

    #[test]
    fn unit_floats_are_clamped() {
        let doc = TaggedDoc::parse("CONFIDENCE: 1.7\nOTHER: -0.2");
        assert_eq!(doc.get_unit_f64("CONFIDENCE"), Some(1.0));
        assert_eq!(doc.get_unit_f64("OTHER"), Some(0.0));
        assert_eq!(doc.get_unit_f64("MISSING"), None);
    }

    #[test]
    fn booleans() {
        let doc = TaggedDoc::parse("COMPLETE: Yes\nPIVOT: false\nODD: maybe");
        assert_eq!(doc.get_bool("COMPLETE"), Some(true));
        assert_eq!(doc.get_bool("PIVOT"), Some(false));
        assert_eq!(doc.get_bool("ODD"), None);
    }
}
