//! Price extraction from free-text supplier replies.
//!
//! Suppliers answer in prose ("We can do $450 per unit, FOB origin"), so the
//! extractor walks an ordered list of patterns and takes the first match of
//! the first pattern that fires. The patterns are deliberately permissive:
//! a dollar-prefixed part number would match, and that is accepted rather
//! than engineered away. Unmatched replies are stored with no price.

use regex::Regex;

/// Ordered recognizers, most explicit first. Pattern order is part of the
/// contract: `$450` beats `450 per unit` when both appear.
const PRICE_PATTERNS: &[&str] = &[
    r"\$\s*(\d+(?:\.\d{1,2})?)",
    r"(?i)price[:\s]*\$?\s*(\d+(?:\.\d{1,2})?)",
    r"(?i)(\d+(?:\.\d{1,2})?)\s*(?:dollars?|usd)",
    r"(?i)quote[:\s]*\$?\s*(\d+(?:\.\d{1,2})?)",
    r"(?i)cost[:\s]*\$?\s*(\d+(?:\.\d{1,2})?)",
    r"(?i)(\d+(?:\.\d{1,2})?)\s*per\s*unit",
];

pub struct PriceExtractor {
    patterns: Vec<Regex>,
}

impl PriceExtractor {
    pub fn new() -> Self {
        let patterns = PRICE_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        Self { patterns }
    }

    /// First capture of the first matching pattern, parsed as a unit price.
    pub fn extract(&self, text: &str) -> Option<f64> {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(text) {
                if let Some(raw) = captures.get(1) {
                    if let Ok(price) = raw.as_str().parse::<f64>() {
                        return Some(price);
                    }
                }
            }
        }
        None
    }
}

impl Default for PriceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::PriceExtractor;

    fn extract(text: &str) -> Option<f64> {
        PriceExtractor::new().extract(text)
    }

    #[test]
    fn dollar_sign_amount_is_extracted() {
        assert_eq!(extract("We can offer this at $450 per unit."), Some(450.0));
        assert_eq!(extract("Quote: $1250.50 plus freight"), Some(1250.5));
    }

    #[test]
    fn labeled_price_without_dollar_sign() {
        assert_eq!(extract("price: 310"), Some(310.0));
        assert_eq!(extract("Price 275.25, lead time 3 weeks"), Some(275.25));
    }

    #[test]
    fn dollars_and_usd_suffixes() {
        assert_eq!(extract("Our best is 499 USD each"), Some(499.0));
        assert_eq!(extract("roughly 42.5 dollars"), Some(42.5));
    }

    #[test]
    fn quote_and_cost_labels() {
        assert_eq!(extract("quote: 899.99"), Some(899.99));
        assert_eq!(extract("unit cost 15.75"), Some(15.75));
    }

    #[test]
    fn per_unit_phrasing() {
        assert_eq!(extract("We charge 300 per unit for orders over 50"), Some(300.0));
    }

    #[test]
    fn earlier_pattern_wins_over_later() {
        // Both "$450" and "500 per unit" are present; the dollar-sign
        // pattern is first in the table.
        assert_eq!(extract("Old rate was 500 per unit, new rate $450"), Some(450.0));
    }

    #[test]
    fn first_match_of_a_pattern_wins() {
        assert_eq!(extract("$100 for samples, $90 at volume"), Some(100.0));
    }

    #[test]
    fn no_price_yields_none() {
        assert_eq!(extract("We no longer stock this item."), None);
        assert_eq!(extract(""), None);
    }
}
