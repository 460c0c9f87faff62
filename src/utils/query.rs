//! Search-expression builder for the registry's essie query syntax.

use crate::entities::criteria::RecruitingStatus;

fn needs_quoting(value: &str) -> bool {
    value.chars().any(|ch| {
        ch.is_whitespace()
            || matches!(
                ch,
                '(' | ')' | '[' | ']' | '"' | ',' | ':' | '^' | '~' | '&' | '|'
            )
    })
}

/// Quotes a term when it would otherwise be split or parsed as an operator.
/// Embedded double quotes are dropped since the syntax has no escape for them.
pub(crate) fn quote_expr_term(value: &str) -> String {
    let value = value.trim();
    let upper = value.to_ascii_uppercase();
    let is_operator = matches!(upper.as_str(), "AND" | "OR" | "NOT");
    if !is_operator && !needs_quoting(value) {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', ""))
}

fn area_group<I, S>(field: &str, values: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let terms = values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| format!("AREA[{field}]{}", quote_expr_term(&v)))
        .collect::<Vec<_>>();
    match terms.len() {
        0 => None,
        1 => terms.into_iter().next(),
        _ => Some(format!("({})", terms.join(" OR "))),
    }
}

/// Combines the keyword, every auxiliary keyword and the country and status
/// filters into a single AND expression.
pub(crate) fn build_search_expr(
    keyword: &str,
    auxiliary_keywords: &[String],
    countries: &[String],
    statuses: &[RecruitingStatus],
) -> String {
    let keyword = keyword.trim();
    let mut parts: Vec<String> = Vec::new();
    if !keyword.is_empty() {
        parts.push(quote_expr_term(keyword));
    }
    for aux in auxiliary_keywords {
        let aux = aux.trim();
        if aux.is_empty() || aux.eq_ignore_ascii_case(keyword) {
            continue;
        }
        parts.push(quote_expr_term(aux));
    }
    if let Some(group) = area_group("LocationCountry", countries) {
        parts.push(group);
    }
    if let Some(group) = area_group(
        "OverallStatus",
        statuses.iter().map(|s| s.registry_label()),
    ) {
        parts.push(group);
    }
    parts.join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_symbols_stay_unquoted() {
        assert_eq!(quote_expr_term("BRAF"), "BRAF");
        assert_eq!(quote_expr_term(" HLA-A "), "HLA-A");
    }

    #[test]
    fn spaced_or_reserved_terms_are_quoted() {
        assert_eq!(quote_expr_term("United States"), "\"United States\"");
        assert_eq!(quote_expr_term("BRAF:V600E"), "\"BRAF:V600E\"");
        assert_eq!(quote_expr_term("or"), "\"or\"");
        assert_eq!(quote_expr_term("say \"hi\" now"), "\"say hi now\"");
    }

    #[test]
    fn keyword_only_expression() {
        assert_eq!(build_search_expr("BRAF", &[], &[], &[]), "BRAF");
    }

    #[test]
    fn auxiliary_keywords_skip_the_searched_keyword() {
        let expr = build_search_expr(
            "BRAF",
            &["braf".to_string(), "TP53".to_string(), " ".to_string()],
            &[],
            &[],
        );
        assert_eq!(expr, "BRAF AND TP53");
    }

    #[test]
    fn filters_become_area_groups() {
        let expr = build_search_expr(
            "EGFR",
            &[],
            &["Germany".to_string(), "United States".to_string()],
            &[
                RecruitingStatus::Recruiting,
                RecruitingStatus::ActiveNotRecruiting,
            ],
        );
        assert_eq!(
            expr,
            "EGFR AND (AREA[LocationCountry]Germany OR AREA[LocationCountry]\"United States\") \
             AND (AREA[OverallStatus]Recruiting OR AREA[OverallStatus]\"Active, not recruiting\")"
        );
    }

    #[test]
    fn single_filter_value_has_no_parentheses() {
        let expr = build_search_expr("ALK", &[], &["France".to_string()], &[]);
        assert_eq!(expr, "ALK AND AREA[LocationCountry]France");
    }
}
