//! CNPJ and CPF extraction with modulo-11 checksum validation.

use regex::Regex;
use std::sync::LazyLock;

/// 14 digits with optional standard punctuation: 12.345.678/0001-95.
static CNPJ_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b").expect("invalid regex")
});

/// 11 digits with optional standard punctuation: 123.456.789-09.
static CPF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b").expect("invalid regex")
});

/// A candidate document span found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSpan {
    /// Byte offset of the match start
    pub start: usize,
    /// Byte offset of the match end
    pub end: usize,
    /// Canonical digit-only form
    pub canonical: String,
}

fn digits_of(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Validate a canonical 14-digit CNPJ checksum.
pub fn is_valid_cnpj(digits: &str) -> bool {
    if digits.len() != 14 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    // All-same-digit sequences pass the arithmetic but are not issued.
    if digits.chars().all(|c| c == digits.as_bytes()[0] as char) {
        return false;
    }
    let nums: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();

    let first = check_digit(&nums[..12], &[5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    if nums[12] != first {
        return false;
    }
    let second = check_digit(&nums[..13], &[6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    nums[13] == second
}

/// Validate a canonical 11-digit CPF checksum.
pub fn is_valid_cpf(digits: &str) -> bool {
    if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if digits.chars().all(|c| c == digits.as_bytes()[0] as char) {
        return false;
    }
    let nums: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();

    let first = check_digit(&nums[..9], &[10, 9, 8, 7, 6, 5, 4, 3, 2]);
    if nums[9] != first {
        return false;
    }
    let second = check_digit(&nums[..10], &[11, 10, 9, 8, 7, 6, 5, 4, 3, 2]);
    nums[10] == second
}

fn check_digit(nums: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = nums.iter().zip(weights).map(|(n, w)| n * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

/// Find checksum-valid CNPJs, canonicalized to 14 digits.
pub fn find_cnpjs(text: &str) -> Vec<DocumentSpan> {
    CNPJ_PATTERN
        .find_iter(text)
        .filter_map(|m| {
            let canonical = digits_of(m.as_str());
            is_valid_cnpj(&canonical).then(|| DocumentSpan {
                start: m.start(),
                end: m.end(),
                canonical,
            })
        })
        .collect()
}

/// Find checksum-valid CPFs, canonicalized to 11 digits.
pub fn find_cpfs(text: &str) -> Vec<DocumentSpan> {
    CPF_PATTERN
        .find_iter(text)
        .filter_map(|m| {
            let canonical = digits_of(m.as_str());
            is_valid_cpf(&canonical).then(|| DocumentSpan {
                start: m.start(),
                end: m.end(),
                canonical,
            })
        })
        .collect()
}

/// Whether the text contains at least one checksum-valid CNPJ.
pub fn contains_valid_cnpj(text: &str) -> bool {
    !find_cnpjs(text).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cnpj_checksum() {
        assert!(is_valid_cnpj("12345678000195"));
        assert!(is_valid_cnpj("11222333000181"));
    }

    #[test]
    fn test_invalid_cnpj_checksum() {
        assert!(!is_valid_cnpj("12345678000100"));
        assert!(!is_valid_cnpj("12345678000194"));
        assert!(!is_valid_cnpj("1234567800019"));
        assert!(!is_valid_cnpj("00000000000000"));
    }

    #[test]
    fn test_valid_cpf_checksum() {
        assert!(is_valid_cpf("12345678909"));
        assert!(is_valid_cpf("11144477735"));
    }

    #[test]
    fn test_invalid_cpf_checksum() {
        assert!(!is_valid_cpf("12345678900"));
        assert!(!is_valid_cpf("11111111111"));
    }

    #[test]
    fn test_find_punctuated_and_bare_cnpj() {
        let spans = find_cnpjs("empresas 12.345.678/0001-95 e 11222333000181");
        let canonicals: Vec<&str> = spans.iter().map(|s| s.canonical.as_str()).collect();
        assert_eq!(canonicals, vec!["12345678000195", "11222333000181"]);
    }

    #[test]
    fn test_bad_checksum_is_not_extracted() {
        assert!(find_cnpjs("fornecedor 12.345.678/0001-00").is_empty());
        assert!(find_cpfs("servidor 123.456.789-00").is_empty());
    }

    #[test]
    fn test_find_cpf() {
        let spans = find_cpfs("CPF 123.456.789-09 do responsável");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].canonical, "12345678909");
    }

    fn cnpj_with_valid_checksum(base: &[u32; 12]) -> String {
        let first = check_digit(base, &[5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
        let mut with_first: Vec<u32> = base.to_vec();
        with_first.push(first);
        let second = check_digit(&with_first, &[6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
        base.iter()
            .chain([&first, &second])
            .map(|d| char::from_digit(*d, 10).unwrap_or('0'))
            .collect()
    }

    proptest::proptest! {
        /// A CNPJ whose check digits follow from its base validates.
        #[test]
        fn generated_cnpj_validates(base in proptest::array::uniform12(0u32..10)) {
            let cnpj = cnpj_with_valid_checksum(&base);
            proptest::prop_assume!(!cnpj.chars().all(|c| c == cnpj.as_bytes()[0] as char));
            proptest::prop_assert!(is_valid_cnpj(&cnpj));
        }

        /// Corrupting the final check digit always rejects.
        #[test]
        fn corrupted_check_digit_rejects(
            base in proptest::array::uniform12(0u32..10),
            bump in 1u32..10
        ) {
            let cnpj = cnpj_with_valid_checksum(&base);
            proptest::prop_assume!(!cnpj.chars().all(|c| c == cnpj.as_bytes()[0] as char));
            let last = cnpj.as_bytes()[13] - b'0';
            let corrupted_digit = (u32::from(last) + bump) % 10;
            let mut corrupted = cnpj[..13].to_string();
            corrupted.push(char::from_digit(corrupted_digit, 10).unwrap_or('0'));
            proptest::prop_assert!(!is_valid_cnpj(&corrupted));
        }
    }
}
