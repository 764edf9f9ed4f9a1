/// Learned digit templates
///
/// A template set maps a single character to a bitstring of
/// `width * height` bits ('1' = ink), produced by the fingerprinting step.
/// The dimensions and the bitstrings travel together: resizing the set
/// drops every learned bitstring so stale lengths can never be matched.
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

pub const MIN_TEMPLATE_SIDE: u32 = 4;
pub const MAX_TEMPLATE_SIDE: u32 = 64;

/// Template sides must lie in `MIN_TEMPLATE_SIDE..=MAX_TEMPLATE_SIDE`
pub fn check_dimensions(width: u32, height: u32) -> Result<(), ProfileError> {
    let side = MIN_TEMPLATE_SIDE..=MAX_TEMPLATE_SIDE;
    if !side.contains(&width) || !side.contains(&height) {
        return Err(ProfileError::Invalid(format!(
            "templates.width and templates.height must be between {MIN_TEMPLATE_SIDE} and {MAX_TEMPLATE_SIDE}, got {width}x{height}"
        )));
    }
    Ok(())
}

fn default_hamming_max() -> u32 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitTemplates {
    width: u32,
    height: u32,
    #[serde(default = "default_hamming_max")]
    hamming_max: u32,
    #[serde(default)]
    digits: BTreeMap<String, String>,
}

impl DigitTemplates {
    /// Create an empty template set
    pub fn new(width: u32, height: u32, hamming_max: u32) -> Self {
        Self {
            width,
            height,
            hamming_max,
            digits: BTreeMap::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of bits in every template of this set
    pub fn bit_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn hamming_max(&self) -> u32 {
        self.hamming_max
    }

    pub fn digits(&self) -> &BTreeMap<String, String> {
        &self.digits
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn get(&self, ch: char) -> Option<&str> {
        self.digits.get(ch.to_string().as_str()).map(String::as_str)
    }

    /// Change the fingerprint dimensions
    ///
    /// Clears every learned bitstring, even when the new size has the same
    /// bit count as the old one.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.digits.clear();
    }

    /// Insert or overwrite the template for `ch`
    ///
    /// Fails with `TemplateMismatch` when the bitstring does not have
    /// `width * height` bits, leaving the set untouched.
    pub fn insert(&mut self, ch: char, bits: String) -> Result<(), ProfileError> {
        if bits.len() != self.bit_len() {
            return Err(ProfileError::TemplateMismatch {
                digit: ch.to_string(),
                expected: self.bit_len(),
                actual: bits.len(),
            });
        }
        self.digits.insert(ch.to_string(), bits);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        check_dimensions(self.width, self.height)?;
        let expected = self.bit_len();
        for (key, bits) in &self.digits {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if !ch.is_whitespace() => {}
                _ => {
                    return Err(ProfileError::Invalid(format!(
                        "templates.digits key '{key}' must be a single character"
                    )))
                }
            }
            if bits.len() != expected {
                return Err(ProfileError::TemplateMismatch {
                    digit: key.clone(),
                    expected,
                    actual: bits.len(),
                });
            }
            if bits.bytes().any(|b| b != b'0' && b != b'1') {
                return Err(ProfileError::Invalid(format!(
                    "templates.digits['{key}'] must contain only '0' and '1'"
                )));
            }
        }
        Ok(())
    }
}

/// Immutable template set shared with one tick
pub type TemplateSnapshot = Arc<DigitTemplates>;

/// Copy-on-write holder for the live template set
///
/// Readers take a cheap `Arc` snapshot; writers build a new set and swap it
/// in atomically, so an evaluation in flight keeps matching against the set
/// it started with.
#[derive(Clone)]
pub struct TemplateStore {
    current: Arc<RwLock<TemplateSnapshot>>,
}

impl TemplateStore {
    pub fn new(templates: DigitTemplates) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(templates))),
        }
    }

    /// Snapshot taken at tick start
    pub fn snapshot(&self) -> TemplateSnapshot {
        Arc::clone(&self.current.read())
    }

    /// Publish a new template set
    pub fn install(&self, templates: DigitTemplates) {
        *self.current.write() = Arc::new(templates);
    }

    /// Apply `edit` to a copy of the current set and publish it if the edit
    /// succeeds; on error the live set is untouched.
    pub fn update<E>(
        &self,
        edit: impl FnOnce(&mut DigitTemplates) -> Result<(), E>,
    ) -> Result<TemplateSnapshot, E> {
        let mut guard = self.current.write();
        let mut next = DigitTemplates::clone(&guard);
        edit(&mut next)?;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> String {
        "1".repeat(n)
    }

    #[test]
    fn test_resize_clears_digits() {
        let mut templates = DigitTemplates::new(5, 8, 6);
        templates.insert('7', ones(40)).unwrap();
        assert!(!templates.is_empty());

        // Same bit count, different shape: still stale
        templates.set_dimensions(8, 5);
        assert!(templates.is_empty());
        assert_eq!(templates.bit_len(), 40);
    }

    #[test]
    fn test_resize_to_same_size_keeps_digits() {
        let mut templates = DigitTemplates::new(5, 8, 6);
        templates.insert('1', ones(40)).unwrap();
        templates.set_dimensions(5, 8);
        assert_eq!(templates.get('1'), Some(ones(40).as_str()));
    }

    #[test]
    fn test_insert_rejects_wrong_length() {
        let mut templates = DigitTemplates::new(4, 4, 2);
        let err = templates.insert('3', ones(15)).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::TemplateMismatch { expected: 16, actual: 15, .. }
        ));
        assert!(templates.is_empty());
    }

    #[test]
    fn test_validate_detects_mismatch_from_document() {
        let json = r#"{"width":4,"height":4,"hamming_max":3,"digits":{"1":"0101"}}"#;
        let templates: DigitTemplates = serde_json::from_str(json).unwrap();
        assert!(matches!(
            templates.validate(),
            Err(ProfileError::TemplateMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_keys_and_bits() {
        let json = r#"{"width":4,"height":4,"digits":{"12":"0000000000000000"}}"#;
        let templates: DigitTemplates = serde_json::from_str(json).unwrap();
        assert!(matches!(templates.validate(), Err(ProfileError::Invalid(_))));

        let json = r#"{"width":4,"height":4,"digits":{"1":"000000000000000x"}}"#;
        let templates: DigitTemplates = serde_json::from_str(json).unwrap();
        assert!(matches!(templates.validate(), Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_snapshot_survives_install() {
        let store = TemplateStore::new(DigitTemplates::new(4, 4, 2));
        let before = store.snapshot();

        store
            .update(|t| t.insert('9', ones(16)))
            .expect("insert should succeed");

        assert!(before.is_empty());
        assert_eq!(store.snapshot().get('9'), Some(ones(16).as_str()));
    }

    #[test]
    fn test_failed_update_leaves_store_untouched() {
        let store = TemplateStore::new(DigitTemplates::new(4, 4, 2));
        let result = store.update(|t| t.insert('9', ones(3)));
        assert!(result.is_err());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_validate_bounds_template_sides() {
        assert!(DigitTemplates::new(4, 64, 0).validate().is_ok());
        assert!(matches!(
            DigitTemplates::new(3, 8, 0).validate(),
            Err(ProfileError::Invalid(_))
        ));

        let json = r#"{"width":100000,"height":100000,"digits":{}}"#;
        let templates: DigitTemplates = serde_json::from_str(json).unwrap();
        assert!(matches!(templates.validate(), Err(ProfileError::Invalid(_))));
    }
}
