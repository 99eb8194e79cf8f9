//! Stage P (Plan): prompt construction and the strict `<agent_N>` extractor
//! (§4.6).

use regex::Regex;

use crate::types::OrchestratorError;

pub const MIN_SUB_QUERIES: usize = 3;
pub const MAX_SUB_QUERIES: usize = 8;

pub fn build_planning_prompt(query: &str, audience_level: Option<&str>, strict: bool) -> String {
    let audience = audience_level.unwrap_or("general");
    let strictness = if strict {
        "You MUST respond with ONLY the tagged sub-queries and nothing else \
         — no preamble, no explanation, no markdown fences."
    } else {
        "Respond with the tagged sub-queries."
    };
    format!(
        "You are planning a research investigation for the query below.\n\
         Query: {query}\n\
         Audience level: {audience}\n\n\
         Break the query into between {MIN_SUB_QUERIES} and {MAX_SUB_QUERIES} independent \
         sub-queries that together cover the topic. Tag each sub-query as XML:\n\
         <agent_1>first sub-query</agent_1>\n\
         <agent_2>second sub-query</agent_2>\n\
         ...\n\n{strictness}"
    )
}

/// Extracts sub-queries from a `<agent_N>...</agent_N>`-tagged response.
/// Rejects free-form text: a response with fewer than 3 or more than 8
/// tagged blocks is a parse failure, not a partial success.
pub fn extract_sub_queries(response: &str) -> Result<Vec<String>, OrchestratorError> {
    let re = Regex::new(r"(?is)<agent_(\d+)>(.*?)</agent_\d+>").expect("static regex");
    let mut tagged: Vec<(usize, String)> = re
        .captures_iter(response)
        .filter_map(|c| {
            let idx: usize = c.get(1)?.as_str().parse().ok()?;
            let body = c.get(2)?.as_str().trim().to_string();
            if body.is_empty() {
                None
            } else {
                Some((idx, body))
            }
        })
        .collect();
    tagged.sort_by_key(|(idx, _)| *idx);

    let sub_queries: Vec<String> = tagged.into_iter().map(|(_, body)| body).collect();
    if sub_queries.len() < MIN_SUB_QUERIES || sub_queries.len() > MAX_SUB_QUERIES {
        return Err(OrchestratorError::PlanningFailed(format!(
            "expected {MIN_SUB_QUERIES}-{MAX_SUB_QUERIES} <agent_N> blocks, found {}",
            sub_queries.len()
        )));
    }
    Ok(sub_queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tagged_sub_queries_in_order() {
        let response = "<agent_2>second</agent_2><agent_1>first</agent_1><agent_3>third</agent_3>";
        let subs = extract_sub_queries(response).unwrap();
        assert_eq!(subs, vec!["first", "second", "third"]);
    }

    #[test]
    fn rejects_free_form_text() {
        let err = extract_sub_queries("Sure, here is my plan: first do X, then Y.").unwrap_err();
        assert!(matches!(err, OrchestratorError::PlanningFailed(_)));
    }

    #[test]
    fn rejects_too_few_sub_queries() {
        let response = "<agent_1>only one</agent_1>";
        assert!(extract_sub_queries(response).is_err());
    }

    #[test]
    fn rejects_too_many_sub_queries() {
        let response: String = (1..=9).map(|i| format!("<agent_{i}>q{i}</agent_{i}>")).collect();
        assert!(extract_sub_queries(&response).is_err());
    }

    #[test]
    fn ignores_empty_tagged_blocks() {
        let response = "<agent_1></agent_1><agent_2>a</agent_2><agent_3>b</agent_3><agent_4>c</agent_4>";
        let subs = extract_sub_queries(response).unwrap();
        assert_eq!(subs.len(), 3);
    }
}
