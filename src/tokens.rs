// 🔤 Token Extractor - significant tokens from free-text descriptions
//
// Shared by the learning store (rule keys) and the reconciliation matcher
// (vendor similarity). A token is significant when it is at least 3
// characters long, not purely numeric, and not a generic banking term,
// preposition or legal-entity suffix.

use std::collections::BTreeSet;

/// Minimum length (in characters) of a significant token
pub const MIN_TOKEN_LEN: usize = 3;

/// Generic banking terms, prepositions and legal-entity suffixes.
/// Stored uppercase, compared after normalization.
const STOPWORDS: &[&str] = &[
    // Banking terms (PT)
    "PIX", "TED", "DOC", "RECEBIDO", "RECEBIDA", "ENVIADO", "ENVIADA", "TRANSFERENCIA",
    "TRANSF", "PAGAMENTO", "PAGTO", "PAG", "PGTO", "COMPRA", "DEBITO", "CREDITO", "BOLETO",
    "TARIFA", "BANCO", "CONTA", "SAQUE", "DEPOSITO", "CARTAO", "AUTOMATICO", "REF",
    // Banking terms (EN)
    "PAYMENT", "TRANSFER", "DEBIT", "CREDIT", "RECEIVED", "SENT", "PURCHASE", "CARD",
    "BANK", "ACH", "WIRE", "POS", "ONLINE",
    // Prepositions / articles
    "DOS", "DAS", "PARA", "COM", "POR", "PELO", "PELA", "SEM", "THE", "AND", "FOR",
    "FROM", "WITH", "VIA",
    // Legal-entity suffixes
    "LTDA", "EIRELI", "EPP", "CIA", "INC", "LLC", "LTD", "CORP", "GMBH",
];

/// Uppercase and strip punctuation (anything neither alphanumeric nor whitespace)
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Extract the ordered, de-duplicated set of significant tokens
///
/// Example:
/// ```
/// use decision_engine::tokens::significant_tokens;
///
/// let tokens = significant_tokens("Contrato Software XYZ - mensal");
/// assert_eq!(tokens.len(), 4);
/// assert!(significant_tokens("PIX RECEBIDO").is_empty());
/// ```
pub fn significant_tokens(text: &str) -> BTreeSet<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .filter(|w| !w.chars().all(|c| c.is_numeric()))
        .filter(|w| !is_stopword(w))
        .map(|w| w.to_string())
        .collect()
}

/// Canonical key for a token set (sorted, space separated)
pub fn token_key(tokens: &BTreeSet<String>) -> String {
    tokens.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// Fraction of `reference` tokens that also appear in `candidate`
pub fn overlap_ratio(candidate: &BTreeSet<String>, reference: &BTreeSet<String>) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    let shared = reference.intersection(candidate).count();
    shared as f64 / reference.len() as f64
}

/// True when the text has no alphabetic word long enough to mean anything
pub fn is_garbled(text: &str) -> bool {
    !normalize(text).split_whitespace().any(|w| {
        w.chars().count() >= MIN_TOKEN_LEN && w.chars().any(|c| c.is_alphabetic())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize("Acme, Ltda."), "ACME LTDA");
        assert_eq!(normalize("s/a n. 12"), "SA N 12");
    }

    #[test]
    fn test_banking_noise_yields_no_tokens() {
        assert!(significant_tokens("PIX RECEBIDO").is_empty());
        assert!(significant_tokens("TED enviada para conta").is_empty());
        assert!(significant_tokens("").is_empty());
    }

    #[test]
    fn test_short_numeric_and_suffix_tokens_dropped() {
        let tokens = significant_tokens("PAG 12345 AB ACME SOFTWARE LTDA 02/2025");
        let expected: BTreeSet<String> =
            ["ACME", "SOFTWARE"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_tokens_are_deduplicated_and_sorted() {
        let tokens = significant_tokens("xyz software XYZ Software");
        assert_eq!(token_key(&tokens), "SOFTWARE XYZ");
    }

    #[test]
    fn test_overlap_ratio() {
        let a = significant_tokens("ACME SOFTWARE CLOUD");
        let b = significant_tokens("Acme Cloud");
        assert_eq!(overlap_ratio(&a, &b), 1.0);
        assert!((overlap_ratio(&b, &a) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(overlap_ratio(&a, &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_is_garbled() {
        assert!(is_garbled(""));
        assert!(is_garbled("   ## 12 / 34 "));
        assert!(is_garbled("x1 y2"));
        assert!(!is_garbled("PIX RECEBIDO"));
    }
}
