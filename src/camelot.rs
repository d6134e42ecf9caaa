//! Camelot wheel mapping for harmonic mixing.
//!
//! Maps musical keys (pitch class + mode, or traditional key names) to Camelot
//! notation and scores harmonic compatibility between two keys. The wheel has
//! 12 positions, each with a minor (A) and major (B) slot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A Camelot wheel position: number 1-12 plus mode letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CamelotKey {
    /// Wheel position, 1..=12.
    pub number: u8,
    /// Mode slot: A = minor, B = major.
    pub letter: CamelotLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CamelotLetter {
    A,
    B,
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.letter {
            CamelotLetter::A => 'A',
            CamelotLetter::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

/// Wheel numbers for major keys, indexed by pitch class (0 = C .. 11 = B).
const MAJOR_WHEEL: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];

/// Wheel numbers for minor keys, indexed by pitch class (0 = C .. 11 = B).
const MINOR_WHEEL: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Flat spellings accepted when parsing traditional key names.
const FLAT_ALIASES: [(&str, u8); 5] = [
    ("Db", 1),
    ("Eb", 3),
    ("Gb", 6),
    ("Ab", 8),
    ("Bb", 10),
];

impl CamelotKey {
    /// Convert a (pitch class, mode) pair into Camelot notation.
    ///
    /// `pitch_class` follows the Spotify convention (0 = C .. 11 = B);
    /// `mode` is 0 for minor, 1 for major. Out-of-range input returns `None`.
    pub fn from_pitch_class(pitch_class: i32, mode: i32) -> Option<Self> {
        if !(0..=11).contains(&pitch_class) {
            return None;
        }
        let idx = pitch_class as usize;
        match mode {
            0 => Some(Self {
                number: MINOR_WHEEL[idx],
                letter: CamelotLetter::A,
            }),
            1 => Some(Self {
                number: MAJOR_WHEEL[idx],
                letter: CamelotLetter::B,
            }),
            _ => None,
        }
    }

    /// Parse a Camelot code such as `"8B"` or `"12a"`.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.len() < 2 {
            return None;
        }
        let (num_part, letter_part) = code.split_at(code.len() - 1);
        let number: u8 = num_part.parse().ok()?;
        if !(1..=12).contains(&number) {
            return None;
        }
        let letter = match letter_part.chars().next()? {
            'A' | 'a' => CamelotLetter::A,
            'B' | 'b' => CamelotLetter::B,
            _ => return None,
        };
        Some(Self { number, letter })
    }

    /// Parse a traditional key name ("C# minor", "Am", "Ebmaj", "F") into
    /// Camelot notation. Bare note names are treated as major.
    pub fn from_key_name(name: &str) -> Option<Self> {
        let (pitch_class, mode) = parse_key_name(name)?;
        Self::from_pitch_class(pitch_class, mode)
    }

    /// Back-conversion to the (pitch class, mode) pair.
    pub fn to_pitch_class(self) -> (i32, i32) {
        let wheel = match self.letter {
            CamelotLetter::A => &MINOR_WHEEL,
            CamelotLetter::B => &MAJOR_WHEEL,
        };
        let pitch = wheel
            .iter()
            .position(|&n| n == self.number)
            .expect("wheel tables cover 1..=12");
        let mode = match self.letter {
            CamelotLetter::A => 0,
            CamelotLetter::B => 1,
        };
        (pitch as i32, mode)
    }

    /// Traditional spelling of this key, e.g. `5A -> "Cmin"`.
    pub fn to_traditional(self) -> String {
        let (pitch, mode) = self.to_pitch_class();
        let suffix = if mode == 1 { "maj" } else { "min" };
        format!("{}{}", PITCH_NAMES[pitch as usize], suffix)
    }

    /// Harmonically compatible keys: the key itself, one step either way on
    /// the wheel in the same mode, and the relative major/minor. Always four
    /// entries, starting with `self`.
    pub fn compatible_keys(self) -> [CamelotKey; 4] {
        let prev = if self.number == 1 { 12 } else { self.number - 1 };
        let next = if self.number == 12 { 1 } else { self.number + 1 };
        let opposite = match self.letter {
            CamelotLetter::A => CamelotLetter::B,
            CamelotLetter::B => CamelotLetter::A,
        };
        [
            self,
            CamelotKey {
                number: prev,
                letter: self.letter,
            },
            CamelotKey {
                number: next,
                letter: self.letter,
            },
            CamelotKey {
                number: self.number,
                letter: opposite,
            },
        ]
    }

    /// Circular distance between two wheel positions (0..=6).
    fn wheel_distance(self, other: CamelotKey) -> u8 {
        let a = i16::from(self.number);
        let b = i16::from(other.number);
        let diff = (a - b).unsigned_abs() as u8;
        diff.min(12 - diff)
    }

    /// Harmonic compatibility score in [0.0, 1.0].
    ///
    /// 1.0 same key; 0.8 energy shift (one step, same mode) or mood shift
    /// (relative major/minor); 0.5 two steps; 0.3 three steps or a cross-mode
    /// pair that is not the relative; 0.0 otherwise.
    pub fn compatibility_score(self, other: CamelotKey) -> f64 {
        if self == other {
            return 1.0;
        }
        if self.compatible_keys().contains(&other) {
            return 0.8;
        }
        if self.letter != other.letter {
            return 0.3;
        }
        match self.wheel_distance(other) {
            2 => 0.5,
            3 => 0.3,
            _ => 0.0,
        }
    }
}

/// Parse a traditional key name into a (pitch class, mode) pair.
///
/// Accepts "C", "C major", "Cmaj", "C#m", "Db minor", "Ebmin", "Am", etc.
pub fn parse_key_name(name: &str) -> Option<(i32, i32)> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Longest note spelling first so "C#" is not read as "C".
    let (note, rest) = split_note(trimmed)?;
    let pitch_class = note_to_pitch_class(note)?;

    let mode_part = rest.trim().to_lowercase();
    let mode = match mode_part.as_str() {
        "" | "maj" | "major" => 1,
        "m" | "min" | "minor" => 0,
        _ => return None,
    };

    Some((i32::from(pitch_class), mode))
}

fn split_note(s: &str) -> Option<(&str, &str)> {
    for len in [2usize, 1] {
        if s.len() >= len && s.is_char_boundary(len) {
            let (head, tail) = s.split_at(len);
            if note_to_pitch_class(head).is_some() {
                return Some((head, tail));
            }
        }
    }
    None
}

fn note_to_pitch_class(note: &str) -> Option<u8> {
    if let Some(idx) = PITCH_NAMES
        .iter()
        .position(|&n| n.eq_ignore_ascii_case(note))
    {
        return Some(idx as u8);
    }
    FLAT_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(note))
        .map(|&(_, pc)| pc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: &str) -> CamelotKey {
        CamelotKey::parse(code).unwrap()
    }

    #[test]
    fn test_pitch_class_mapping_is_bijective() {
        let mut seen = std::collections::HashSet::new();
        for pitch in 0..12 {
            for mode in 0..2 {
                let camelot = CamelotKey::from_pitch_class(pitch, mode).unwrap();
                assert!(seen.insert(camelot), "duplicate mapping for {}", camelot);
                assert_eq!(camelot.to_pitch_class(), (pitch, mode));
            }
        }
        assert_eq!(seen.len(), 24);
    }

    #[test]
    fn test_known_mappings() {
        assert_eq!(CamelotKey::from_pitch_class(0, 1).unwrap().to_string(), "8B");
        assert_eq!(CamelotKey::from_pitch_class(0, 0).unwrap().to_string(), "5A");
        assert_eq!(CamelotKey::from_pitch_class(1, 0).unwrap().to_string(), "12A");
        assert_eq!(CamelotKey::from_pitch_class(9, 0).unwrap().to_string(), "8A");
        assert_eq!(CamelotKey::from_pitch_class(11, 1).unwrap().to_string(), "1B");
    }

    #[test]
    fn test_csharp_minor_is_5a_relative() {
        // C# minor = pitch class 1, mode 0 -> 12A.
        assert_eq!(CamelotKey::from_key_name("C# minor").unwrap().to_string(), "12A");
        assert_eq!(CamelotKey::from_key_name("C#m").unwrap().to_string(), "12A");
        assert_eq!(CamelotKey::from_key_name("Dbmin").unwrap().to_string(), "12A");
    }

    #[test]
    fn test_key_name_parsing() {
        assert_eq!(CamelotKey::from_key_name("C").unwrap().to_string(), "8B");
        assert_eq!(CamelotKey::from_key_name("C major").unwrap().to_string(), "8B");
        assert_eq!(CamelotKey::from_key_name("Am").unwrap().to_string(), "8A");
        assert_eq!(CamelotKey::from_key_name("Eb").unwrap().to_string(), "5B");
        assert_eq!(CamelotKey::from_key_name("Bbm").unwrap().to_string(), "3A");
        assert!(CamelotKey::from_key_name("H major").is_none());
        assert!(CamelotKey::from_key_name("").is_none());
    }

    #[test]
    fn test_compatible_keys_size_and_membership() {
        for pitch in 0..12 {
            for mode in 0..2 {
                let camelot = CamelotKey::from_pitch_class(pitch, mode).unwrap();
                let compatible = camelot.compatible_keys();
                assert_eq!(compatible.len(), 4);
                assert!(compatible.contains(&camelot));
                let unique: std::collections::HashSet<_> = compatible.iter().collect();
                assert_eq!(unique.len(), 4);
            }
        }
    }

    #[test]
    fn test_wheel_wraparound() {
        let neighbors_1a: Vec<String> = key("1A")
            .compatible_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(neighbors_1a, vec!["1A", "12A", "2A", "1B"]);

        let neighbors_12b: Vec<String> = key("12B")
            .compatible_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(neighbors_12b, vec!["12B", "11B", "1B", "12A"]);
    }

    #[test]
    fn test_compatibility_scores() {
        assert_eq!(key("8A").compatibility_score(key("8A")), 1.0);
        assert_eq!(key("8A").compatibility_score(key("7A")), 0.8);
        assert_eq!(key("8A").compatibility_score(key("9A")), 0.8);
        assert_eq!(key("8A").compatibility_score(key("8B")), 0.8);
        assert_eq!(key("8A").compatibility_score(key("6A")), 0.5);
        assert_eq!(key("8A").compatibility_score(key("11A")), 0.3);
        assert_eq!(key("8A").compatibility_score(key("2A")), 0.0);
        // Cross-mode, not relative.
        assert_eq!(key("8A").compatibility_score(key("3B")), 0.3);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CamelotKey::parse("").is_none());
        assert!(CamelotKey::parse("13A").is_none());
        assert!(CamelotKey::parse("0B").is_none());
        assert!(CamelotKey::parse("8C").is_none());
        assert!(CamelotKey::parse("AB").is_none());
    }

    #[test]
    fn test_traditional_round_trip() {
        for pitch in 0..12 {
            for mode in 0..2 {
                let camelot = CamelotKey::from_pitch_class(pitch, mode).unwrap();
                let name = camelot.to_traditional();
                assert_eq!(CamelotKey::from_key_name(&name), Some(camelot));
            }
        }
    }
}
