//! Text canonicalization for scraped part names.
//!
//! Every name coming off a page passes through [`normalize`] before it is
//! used as a key or stored, so that visually-equivalent spellings (full-width
//! vs half-width Latin, ideographic spaces) collapse to a single string.
//! The substitution step is strictly character-for-character; the width
//! conversion never changes the number of characters.

/// Reserved key prefix marking a part record keyed by name instead of code.
pub const NAME_KEY_PREFIX: &str = "pl-name-";

/// Offset between full-width Latin forms (U+FF01..U+FF5E) and ASCII.
const FULLWIDTH_OFFSET: u32 = 0xFEE0;

/// Canonicalize a scraped name: half-width conversion, then trim.
///
/// Deterministic and idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    to_half_width(raw).trim().to_string()
}

/// Convert full-width Latin letters, digits, and a fixed punctuation set to
/// their half-width equivalents, character-for-character.
pub fn to_half_width(orig: &str) -> String {
    let out: String = orig.chars().map(half_width_char).collect();
    // Substitution must preserve the character count.
    debug_assert_eq!(orig.chars().count(), out.chars().count());
    out
}

fn half_width_char(c: char) -> char {
    match c {
        'Ａ'..='Ｚ' | 'ａ'..='ｚ' | '０'..='９' => {
            char::from_u32(c as u32 - FULLWIDTH_OFFSET).unwrap_or(c)
        }
        '\u{3000}' => ' ', // ideographic space
        '．' => '.',
        '，' => ',',
        '：' => ':',
        '；' => ';',
        '－' => '-',
        '％' => '%',
        '＃' => '#',
        '＿' => '_',
        '（' => '(',
        '）' => ')',
        '［' => '[',
        '］' => ']',
        '｛' => '{',
        '｝' => '}',
        '／' => '/',
        '＼' => '\\',
        other => other,
    }
}

/// Derive the map key for a name-only (provisional) part record.
///
/// Hyphens, slashes, and whitespace are squashed out so that minor
/// punctuation differences between pages still hit the same record.
pub fn name_key_of(name: &str) -> String {
    let squashed: String = normalize(name)
        .chars()
        .filter(|c| !matches!(c, '-' | '/') && !c.is_whitespace())
        .collect();
    format!("{NAME_KEY_PREFIX}{squashed}")
}

/// True when `key` addresses a provisional, name-keyed record.
pub fn is_name_key(key: &str) -> bool {
    key.starts_with(NAME_KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullwidth_letters_and_digits() {
        assert_eq!(normalize("ＡＢＣ０１２"), "ABC012");
        assert_eq!(normalize("ａｂｃ"), "abc");
    }

    #[test]
    fn test_fullwidth_punctuation() {
        assert_eq!(normalize("Ａ１２（入）"), "A12(入)");
        assert_eq!(normalize("１／４Ｗ　５％"), "1/4W 5%");
        assert_eq!(normalize("［ＬＥＤ］：赤"), "[LED]:赤");
    }

    #[test]
    fn test_substitution_preserves_char_count() {
        let orig = "Ａ１２（入）　ｘ／ｙ";
        let converted = to_half_width(orig);
        assert_eq!(orig.chars().count(), converted.chars().count());
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(normalize("  ＬＥＤ ５ｍｍ  "), "LED 5mm");
        assert_eq!(normalize("\u{3000}抵抗\u{3000}"), "抵抗");
    }

    #[test]
    fn test_idempotent() {
        let samples = ["Ａ１２（入）", "  ＬＥＤ　５ｍｍ ", "plain ascii", "赤色ＬＥＤ ５ｍｍ (１００個入)"];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_untouched_characters_pass_through() {
        assert_eq!(normalize("カーボン抵抗 1kΩ"), "カーボン抵抗 1kΩ");
    }

    #[test]
    fn test_name_key_squashes_separators() {
        assert_eq!(name_key_of("LED 5mm 赤"), name_key_of("LED5mm赤"));
        assert_eq!(name_key_of("1/4W-100Ω"), name_key_of("1 4W 100Ω"));
        assert!(name_key_of("LED 5mm").starts_with(NAME_KEY_PREFIX));
    }

    #[test]
    fn test_name_key_normalizes_width_first() {
        assert_eq!(name_key_of("ＬＥＤ　５ｍｍ"), name_key_of("LED 5mm"));
    }

    #[test]
    fn test_is_name_key() {
        assert!(is_name_key(&name_key_of("anything")));
        assert!(!is_name_key("104297"));
    }
}
