use serde::{Deserialize, Serialize};

/// Attack types recognised in a question, in match priority order.
pub const ATTACK_TYPES: [&str; 4] = ["phishing", "malware", "ransomware", "ddos"];

/// Reporting years recognised in a question, in match priority order.
pub const YEARS: [&str; 5] = ["2020", "2021", "2022", "2023", "2024"];

/// Filters pulled out of a free-text question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub attack_type: Option<String>,
    pub year: Option<String>,
}

/// Scans `query` for a known attack type and year.
///
/// Both lookups are plain substring searches; the first entry of
/// [`ATTACK_TYPES`] / [`YEARS`] found anywhere in the text wins, so
/// "malware or phishing" yields `Phishing`. Nothing checks that a year is a
/// standalone token: "22024" still yields `2024`.
pub fn extract_query_params(query: &str) -> QueryParams {
    let lowered = query.to_lowercase();

    let attack_type = ATTACK_TYPES
        .iter()
        .find(|attack| lowered.contains(*attack))
        .map(|attack| normalize_attack_type(attack));

    let year = YEARS
        .iter()
        .find(|year| query.contains(*year))
        .map(|year| year.to_string());

    QueryParams { attack_type, year }
}

fn normalize_attack_type(attack: &str) -> String {
    if attack == "ddos" {
        return "DDoS".to_string();
    }
    let mut chars = attack.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_each_attack_type() {
        let cases = [
            ("any phishing losses?", "Phishing"),
            ("PHISHING", "Phishing"),
            ("Malware incidents", "Malware"),
            ("what about RansomWare", "Ransomware"),
            ("ddos", "DDoS"),
            ("DDoS exposure", "DDoS"),
        ];
        for (query, expected) in cases {
            let params = extract_query_params(query);
            assert_eq!(params.attack_type.as_deref(), Some(expected), "{query}");
        }
    }

    #[test]
    fn test_absent_when_no_keyword() {
        let params = extract_query_params("How exposed are we overall?");
        assert_eq!(params, QueryParams::default());
    }

    #[test]
    fn test_years_in_range_only() {
        assert_eq!(extract_query_params("losses in 2020").year.as_deref(), Some("2020"));
        assert_eq!(extract_query_params("losses in 2024").year.as_deref(), Some("2024"));
        assert_eq!(extract_query_params("losses in 2019").year, None);
        assert_eq!(extract_query_params("losses in 2025").year, None);
    }

    #[test]
    fn test_first_match_follows_declared_order() {
        let params = extract_query_params("ddos, then ransomware, then phishing in 2024 and 2021");
        assert_eq!(params.attack_type.as_deref(), Some("Phishing"));
        assert_eq!(params.year.as_deref(), Some("2021"));
    }

    #[test]
    fn test_year_inside_longer_number_still_matches() {
        assert_eq!(extract_query_params("ref 22024").year.as_deref(), Some("2024"));
    }

    #[test]
    fn test_phishing_question() {
        let params = extract_query_params("What was the phishing loss in 2023?");
        assert_eq!(params.attack_type.as_deref(), Some("Phishing"));
        assert_eq!(params.year.as_deref(), Some("2023"));
    }
}
