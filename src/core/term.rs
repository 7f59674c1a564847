use unicode_normalization::UnicodeNormalization;

/// 词项归一化：trim → NFC → 小写。
///
/// 入库（intern）与查询（resolve）必须走同一条归一化路径，否则
/// "Café" 与 "cafe\u{301}" 会落到不同 TermId。空串不是合法词项。
pub fn normalize_term(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let term: String = trimmed.nfc().flat_map(char::to_lowercase).collect();
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}

/// 把一段自由文本切成归一化词项（锚文本匹配用）
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter_map(normalize_term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_composition() {
        assert_eq!(normalize_term("  Cat ").as_deref(), Some("cat"));
        assert_eq!(
            normalize_term("Cafe\u{301}"),
            normalize_term("café"),
        );
    }

    #[test]
    fn blank_is_not_a_term() {
        assert_eq!(normalize_term(""), None);
        assert_eq!(normalize_term(" \t "), None);
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        let v: Vec<String> = tokenize("Best CAT-food, ever!").collect();
        assert_eq!(v, vec!["best", "cat", "food", "ever"]);
    }
}
