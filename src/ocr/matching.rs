/// Digit segmentation and template matching
use serde::Serialize;

use super::preprocessing::Bitmap;
use super::templates::DigitTemplates;

/// Best template for one slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceMatch {
    pub index: usize,
    /// Closest template character, `None` when no templates are learned
    pub best: Option<char>,
    pub distance: Option<u32>,
    /// Whether `distance <= hamming_max`
    pub accepted: bool,
}

/// Result of reading one crop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadReport {
    pub value: Option<i64>,
    /// Concatenated characters when every slice resolved
    pub text: Option<String>,
    pub slices: Vec<SliceMatch>,
    /// Why `value` is null
    pub reason: Option<String>,
}

impl ReadReport {
    pub fn distances(&self) -> Vec<Option<u32>> {
        self.slices.iter().map(|s| s.distance).collect()
    }
}

/// Split a bitmap into `digits` equal-width column slices
///
/// Every slice is at least one column wide, even when the bitmap is narrower
/// than the digit count.
pub fn segment(bitmap: &Bitmap, digits: u32) -> Vec<Bitmap> {
    let digits = digits.max(1);
    let bw = bitmap.width();
    let last = bw.saturating_sub(1);
    (0..digits)
        .map(|i| {
            let x0 = ((i as f64 * bw as f64 / digits as f64).round() as u32).min(last);
            let x1 = ((i as f64 + 1.0) * bw as f64 / digits as f64).round() as u32;
            let x1 = (x0 + 1).max(x1.min(bw));
            bitmap.columns(x0, x1)
        })
        .collect()
}

/// Fingerprint a slice at the template dimensions
pub fn fingerprint(slice: &Bitmap, width: u32, height: u32) -> String {
    slice.resize_nearest(width, height).to_bitstring()
}

/// Count of differing bits; length differences count as mismatches
pub fn hamming(a: &str, b: &str) -> u32 {
    let diff = a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count();
    (diff + a.len().abs_diff(b.len())) as u32
}

/// Closest template to `bits`, ties resolved by character order
pub fn best_match(bits: &str, templates: &DigitTemplates) -> Option<(char, u32)> {
    templates
        .digits()
        .iter()
        .filter_map(|(key, template)| key.chars().next().map(|ch| (ch, hamming(bits, template))))
        .min_by_key(|&(_, distance)| distance)
}

/// Match one fingerprint per slice against the template set
pub fn match_fingerprints(fingerprints: &[String], templates: &DigitTemplates) -> ReadReport {
    let hamming_max = templates.hamming_max();
    let slices: Vec<SliceMatch> = fingerprints
        .iter()
        .enumerate()
        .map(|(index, bits)| match best_match(bits, templates) {
            Some((ch, distance)) => SliceMatch {
                index,
                best: Some(ch),
                distance: Some(distance),
                accepted: distance <= hamming_max,
            },
            None => SliceMatch {
                index,
                best: None,
                distance: None,
                accepted: false,
            },
        })
        .collect();

    if templates.is_empty() {
        return ReadReport {
            value: None,
            text: None,
            slices,
            reason: Some("no templates learned".into()),
        };
    }

    if let Some(unresolved) = slices.iter().find(|s| !s.accepted) {
        let reason = match (unresolved.best, unresolved.distance) {
            (Some(ch), Some(distance)) => format!(
                "slice {} unresolved: best '{ch}' at distance {distance} > hamming_max {hamming_max}",
                unresolved.index
            ),
            _ => format!("slice {} unresolved", unresolved.index),
        };
        return ReadReport {
            value: None,
            text: None,
            slices,
            reason: Some(reason),
        };
    }

    let text: String = slices.iter().filter_map(|s| s.best).collect();
    match text.parse::<i64>() {
        Ok(value) => ReadReport {
            value: Some(value),
            text: Some(text),
            slices,
            reason: None,
        },
        Err(_) => ReadReport {
            value: None,
            reason: Some(format!("'{text}' is not an integer")),
            text: Some(text),
            slices,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap_from_rows(rows: &[&str]) -> Bitmap {
        let mut bitmap = Bitmap::new(rows[0].len() as u32, rows.len() as u32);
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                bitmap.set(x as u32, y as u32, ch == '1');
            }
        }
        bitmap
    }

    #[test]
    fn test_segment_equal_widths() {
        let bitmap = bitmap_from_rows(&["110011001100"]);
        let slices = segment(&bitmap, 3);
        assert_eq!(slices.len(), 3);
        for slice in &slices {
            assert_eq!(slice.width(), 4);
            assert_eq!(slice.to_bitstring(), "1100");
        }
    }

    #[test]
    fn test_segment_narrower_than_digits() {
        let bitmap = bitmap_from_rows(&["10"]);
        let slices = segment(&bitmap, 3);
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.width() == 1));
    }

    #[test]
    fn test_hamming() {
        assert_eq!(hamming("1010", "1010"), 0);
        assert_eq!(hamming("1010", "0101"), 4);
        assert_eq!(hamming("10", "1011"), 2);
    }

    #[test]
    fn test_match_resolves_digits() {
        let mut templates = DigitTemplates::new(4, 1, 0);
        templates.insert('1', "0110".into()).unwrap();
        templates.insert('4', "1001".into()).unwrap();

        let report = match_fingerprints(&["1001".into(), "0110".into()], &templates);
        assert_eq!(report.value, Some(41));
        assert_eq!(report.text.as_deref(), Some("41"));
        assert_eq!(report.distances(), vec![Some(0), Some(0)]);
        assert!(report.reason.is_none());
    }

    #[test]
    fn test_match_names_unresolved_slice() {
        let mut templates = DigitTemplates::new(4, 1, 1);
        templates.insert('7', "1111".into()).unwrap();

        let report = match_fingerprints(&["1111".into(), "0000".into()], &templates);
        assert_eq!(report.value, None);
        let reason = report.reason.unwrap();
        assert!(reason.starts_with("slice 1 unresolved"), "{reason}");
        assert!(!report.slices[1].accepted);
    }

    #[test]
    fn test_match_without_templates() {
        let templates = DigitTemplates::new(4, 1, 10);
        let report = match_fingerprints(&["1111".into()], &templates);
        assert_eq!(report.value, None);
        assert_eq!(report.reason.as_deref(), Some("no templates learned"));
        assert_eq!(report.slices[0].best, None);
    }

    #[test]
    fn test_non_digit_templates_yield_null() {
        let mut templates = DigitTemplates::new(4, 1, 0);
        templates.insert('/', "1111".into()).unwrap();
        let report = match_fingerprints(&["1111".into()], &templates);
        assert_eq!(report.value, None);
        assert_eq!(report.text.as_deref(), Some("/"));
    }
}
