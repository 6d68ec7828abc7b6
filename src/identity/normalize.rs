//! Deterministic title normalization used for cross-platform matching.

use unicode_normalization::UnicodeNormalization;

/// Edition suffixes stripped from the end of a normalized title, longest
/// first so "game of the year edition" wins over "game of the year".
const EDITION_SUFFIXES: [&str; 14] = [
    "game of the year edition",
    "game of the year",
    "goty edition",
    "goty",
    "complete edition",
    "definitive edition",
    "enhanced edition",
    "deluxe edition",
    "ultimate edition",
    "anniversary edition",
    "collectors edition",
    "directors cut",
    "remastered",
    "remaster",
];

/// Lowercased, NFKD-folded, punctuation-stripped, edition-stripped form of a
/// title. Pure function of its input; the stored `normalized_title` column is
/// always exactly this.
pub fn normalize_title(raw: &str) -> String {
    // NFKD fold, then drop combining marks and ™/®/© glyphs.
    let folded: String = raw
        .nfkd()
        .filter(|c| !is_stripped_glyph(*c))
        .collect();

    // Lowercase, punctuation to spaces, collapse runs.
    let mut cleaned = String::with_capacity(folded.len());
    let mut prev_space = true;
    for ch in folded.chars() {
        let lowered = ch.to_lowercase().next().unwrap_or(ch);
        let mapped = if lowered.is_alphanumeric() {
            Some(lowered)
        } else if lowered.is_whitespace() || is_punctuation(lowered) {
            None
        } else {
            Some(lowered)
        };
        match mapped {
            Some(c) => {
                cleaned.push(c);
                prev_space = false;
            }
            None => {
                if !prev_space {
                    cleaned.push(' ');
                    prev_space = true;
                }
            }
        }
    }
    let mut out = cleaned.trim().to_string();

    // Strip trailing edition markers, repeatedly (covers "GOTY Remastered").
    loop {
        let before = out.len();
        for suffix in EDITION_SUFFIXES {
            if let Some(stripped) = out.strip_suffix(suffix) {
                out = stripped.trim_end().to_string();
                break;
            }
        }
        if out.len() == before || out.is_empty() {
            break;
        }
    }
    out
}

/// URL-safe slug: normalized title with spaces as dashes.
pub fn slugify(title: &str) -> String {
    normalize_title(title)
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

fn is_stripped_glyph(c: char) -> bool {
    matches!(c, '\u{2122}' | '\u{00AE}' | '\u{00A9}')
        || unicode_normalization::char::is_combining_mark(c)
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c, '\u{2013}' | '\u{2014}' | '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        assert_eq!(
            normalize_title("The Witcher 3: Wild Hunt"),
            "the witcher 3 wild hunt"
        );
        assert_eq!(
            normalize_title("  S.T.A.L.K.E.R.   2  "),
            "s t a l k e r 2"
        );
    }

    #[test]
    fn strips_edition_suffixes() {
        assert_eq!(
            normalize_title("The Witcher 3 - Wild Hunt (Game of the Year Edition)"),
            "the witcher 3 wild hunt"
        );
        assert_eq!(normalize_title("Skyrim: Special Edition GOTY"), "skyrim special edition");
        assert_eq!(normalize_title("Dark Souls Remastered"), "dark souls");
    }

    #[test]
    fn drops_trademark_glyphs_and_folds_accents() {
        assert_eq!(normalize_title("Pokémon™"), "pokemon");
        assert_eq!(normalize_title("Hades®"), "hades");
    }

    #[test]
    fn matching_titles_converge() {
        let a = normalize_title("The Witcher 3: Wild Hunt");
        let b = normalize_title("The Witcher 3 - Wild Hunt (Game of the Year Edition)");
        assert_eq!(a, b);
    }

    #[test]
    fn slug_is_dash_separated() {
        assert_eq!(slugify("The Witcher 3: Wild Hunt"), "the-witcher-3-wild-hunt");
    }
}
