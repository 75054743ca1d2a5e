//! Citation extraction from Dutch legal text.
//!
//! Finds ECLI case-law identifiers, statute article references
//! (`artikel 6:162 BW`, `art. 3.1 Omgevingswet`) and names of laws.

use std::sync::LazyLock;

use regex::Regex;

static ECLI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bECLI:[A-Z]{2}:[A-Z0-9]{1,7}:\d{4}:[A-Za-z0-9.]{1,25}\b")
        .expect("ECLI pattern compiles")
});

static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:[Aa]rtikel|[Aa]rt\.)\s+(\d+(?:[.:]\d+)*[a-z]?)(?:,?\s+(?:lid|onder)\s+\S+?)?(?:,?\s+(?:van\s+(?:de|het)\s+)?([A-Z][A-Za-z]*(?:wet|besluit)?|[A-Z]{1,5}))?\b",
    )
    .expect("article pattern compiles")
});

static LAW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Z][a-z]+(?:wet|besluit|verordening)|(?:Wet|Besluit)\s+[a-z]+(?:\s[a-z]+)?)\b")
        .expect("law pattern compiles")
});

fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// All ECLI identifiers in order of first appearance.
pub fn extract_eclis(text: &str) -> Vec<String> {
    unique(ECLI_RE.find_iter(text).map(|m| m.as_str().trim_end_matches('.').to_string()))
}

/// Statute article references, normalized to `artikel <nr> [<code>]`.
pub fn extract_article_references(text: &str) -> Vec<String> {
    unique(ARTICLE_RE.captures_iter(text).map(|c| {
        let number = &c[1];
        match c.get(2) {
            Some(code) => format!("artikel {number} {}", code.as_str()),
            None => format!("artikel {number}"),
        }
    }))
}

/// Names of laws and decrees mentioned in the text.
pub fn extract_law_names(text: &str) -> Vec<String> {
    unique(LAW_RE.find_iter(text).map(|m| m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Het hof verwijst naar ECLI:NL:HR:2019:1734 en ECLI:NL:RVS:2022:3. \
        Zie ook ECLI:NL:HR:2019:1734. Op grond van artikel 6:162 BW is de gemeente \
        aansprakelijk; art. 3.1 Omgevingswet en artikel 8, lid 2 van de Awb zijn van toepassing. \
        De Woningwet en de Wet ruimtelijke ordening blijven buiten beschouwing.";

    #[test]
    fn eclis_are_unique_and_ordered() {
        assert_eq!(
            extract_eclis(TEXT),
            vec!["ECLI:NL:HR:2019:1734", "ECLI:NL:RVS:2022:3"]
        );
    }

    #[test]
    fn article_references_are_normalized() {
        let refs = extract_article_references(TEXT);
        assert!(refs.contains(&"artikel 6:162 BW".to_string()));
        assert!(refs.contains(&"artikel 3.1 Omgevingswet".to_string()));
        assert!(refs.contains(&"artikel 8 Awb".to_string()));
    }

    #[test]
    fn law_names() {
        let laws = extract_law_names(TEXT);
        assert!(laws.contains(&"Omgevingswet".to_string()));
        assert!(laws.contains(&"Woningwet".to_string()));
        assert!(laws.contains(&"Wet ruimtelijke ordening".to_string()));
    }

    #[test]
    fn no_citations_in_plain_text() {
        assert!(extract_eclis("geen verwijzingen").is_empty());
        assert!(extract_article_references("geen verwijzingen").is_empty());
    }
}
