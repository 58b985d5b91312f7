//! Monetary value extraction.
//!
//! Recognizes Brazilian-formatted amounts ("R$ 1.000.000,00") and scaled
//! shorthand ("1,5 milhões", "500 mil"). A bare number without the R$
//! prefix or a scale word is not money. Values normalize to positive
//! centavos.

use regex::Regex;
use std::sync::LazyLock;

static MONEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(r\$)\s*)?(\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?)\s*(mil\b|milh[õo]es\b|milh[ãa]o\b|bilh[õo]es\b|bilh[ãa]o\b)?",
    )
    .expect("invalid regex")
});

/// A monetary amount found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyCandidate {
    /// Byte offset of the match start
    pub start: usize,
    /// Byte offset of the match end
    pub end: usize,
    /// The amount in centavos
    pub centavos: i64,
}

fn parse_brazilian_number(text: &str) -> Option<f64> {
    let normalized = text.replace('.', "").replace(',', ".");
    normalized.parse().ok()
}

fn scale_of(word: &str) -> f64 {
    let folded = super::fold_for_matching(word);
    if folded.starts_with("mil") && !folded.starts_with("milh") {
        1_000.0
    } else if folded.starts_with("milh") {
        1_000_000.0
    } else if folded.starts_with("bilh") {
        1_000_000_000.0
    } else {
        1.0
    }
}

/// Find every monetary amount in the text.
pub fn find_money(text: &str) -> Vec<MoneyCandidate> {
    MONEY_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let m = caps.get(0).expect("full match");
            let has_prefix = caps.get(1).is_some();
            let scale_word = caps.get(3);
            // Bare numbers are years, counts, identifiers; not money.
            if !has_prefix && scale_word.is_none() {
                return None;
            }

            let value = parse_brazilian_number(&caps[2])?;
            let scale = scale_word.map_or(1.0, |w| scale_of(w.as_str()));
            let centavos = (value * scale * 100.0).round() as i64;
            (centavos > 0).then_some(MoneyCandidate {
                start: m.start(),
                end: m.end(),
                centavos,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amounts(text: &str) -> Vec<i64> {
        find_money(text).into_iter().map(|m| m.centavos).collect()
    }

    #[test]
    fn test_full_brazilian_format() {
        assert_eq!(amounts("contrato de R$ 1.000.000,00"), vec![100_000_000]);
        assert_eq!(amounts("R$ 2.500,50 pagos"), vec![250_050]);
    }

    #[test]
    fn test_scaled_shorthand() {
        assert_eq!(amounts("acima de 1,5 milhões"), vec![150_000_000]);
        assert_eq!(amounts("cerca de 500 mil"), vec![50_000_000]);
        assert_eq!(amounts("quase 2 bilhões"), vec![200_000_000_000]);
    }

    #[test]
    fn test_prefix_with_scale() {
        assert_eq!(amounts("acima de R$ 1 milhão"), vec![100_000_000]);
    }

    #[test]
    fn test_bare_numbers_are_not_money() {
        assert!(amounts("contratos de 2024").is_empty());
        assert!(amounts("processo 123456").is_empty());
    }

    #[test]
    fn test_zero_is_not_money() {
        assert!(amounts("R$ 0,00").is_empty());
    }

    #[test]
    fn test_multiple_amounts_keep_text_order() {
        let found = amounts("entre R$ 10 mil e R$ 2 milhões");
        assert_eq!(found, vec![1_000_000, 200_000_000]);
    }
}
