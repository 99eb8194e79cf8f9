//! Loose-argument normalization (§4.7). Schema-valid inputs pass through
//! unchanged; this only rescues calls that arrive as a single string in a
//! loose carrier field.

use serde_json::{json, Value};

const CARRIER_FIELDS: [&str; 4] = ["random_string", "raw", "text", "payload"];

fn loose_carrier(args: &Value) -> Option<String> {
    if let Value::String(s) = args {
        return Some(s.clone());
    }
    let obj = args.as_object()?;
    for field in CARRIER_FIELDS {
        if let Some(Value::String(s)) = obj.get(field) {
            return Some(s.clone());
        }
    }
    None
}

/// Schema-valid object inputs (anything already structured the way the
/// tool expects) are returned unchanged; normalization only kicks in for a
/// loose string carrier.
pub fn normalize(tool: &str, args: Value) -> Value {
    if args.is_object() && !args.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        let obj = args.as_object().unwrap();
        let only_carrier_fields = obj.keys().all(|k| CARRIER_FIELDS.contains(&k.as_str()));
        if !only_carrier_fields {
            return args;
        }
    }

    let Some(raw) = loose_carrier(&args) else {
        return args;
    };

    match tool {
        "calc" => json!({ "expr": raw }),
        "date_time" => json!({ "format": raw }),
        "job_status" | "get_job_status" | "get_job_result" | "cancel_job" => json!({ "job_id": raw }),
        "get_report" | "get_report_content" => json!({ "reportId": raw }),
        "history" | "list_research_history" => {
            if raw.trim().parse::<u64>().is_ok() {
                json!({ "limit": raw.trim().parse::<u64>().unwrap() })
            } else {
                json!({ "queryFilter": raw })
            }
        }
        "retrieve" => {
            let upper = raw.to_ascii_uppercase();
            if upper.contains("SELECT") || raw.contains("mode:sql") {
                json!({ "mode": "sql", "sql": raw })
            } else {
                json!({ "mode": "index", "query": raw })
            }
        }
        "research" | "submit_research" | "conduct_research" => json!({ "query": raw }),
        _ => args,
    }
}

/// Aliases accepted in addition to a tool's canonical field names. Applied
/// after `normalize` so a schema-valid object using an alias still passes
/// validation.
pub fn apply_field_aliases(tool: &str, mut args: Value) -> Value {
    let Some(obj) = args.as_object_mut() else {
        return args;
    };
    match tool {
        "job_status" | "get_job_status" | "get_job_result" | "cancel_job" => {
            if !obj.contains_key("job_id") {
                for alias in ["jobId", "id"] {
                    if let Some(v) = obj.remove(alias) {
                        obj.insert("job_id".to_string(), v);
                        break;
                    }
                }
            }
        }
        "research" | "submit_research" | "conduct_research" => {
            if !obj.contains_key("query") {
                if let Some(v) = obj.remove("q") {
                    obj.insert("query".to_string(), v);
                }
            }
        }
        "retrieve" => {
            if !obj.contains_key("query") && !obj.contains_key("sql") {
                for alias in ["search", "query"] {
                    if let Some(v) = obj.remove(alias) {
                        obj.insert("query".to_string(), v);
                        break;
                    }
                }
            }
        }
        _ => {}
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_valid_object_passes_through_unchanged() {
        let args = json!({ "query": "rust ownership" });
        assert_eq!(normalize("research", args.clone()), args);
    }

    #[test]
    fn loose_string_normalizes_calc() {
        assert_eq!(normalize("calc", json!("2 + 2")), json!({ "expr": "2 + 2" }));
    }

    #[test]
    fn loose_carrier_field_normalizes_job_status() {
        assert_eq!(
            normalize("job_status", json!({ "raw": "abc-123" })),
            json!({ "job_id": "abc-123" })
        );
    }

    #[test]
    fn history_numeric_string_becomes_limit() {
        assert_eq!(normalize("history", json!("10")), json!({ "limit": 10 }));
    }

    #[test]
    fn history_non_numeric_string_becomes_query_filter() {
        assert_eq!(
            normalize("history", json!("rust")),
            json!({ "queryFilter": "rust" })
        );
    }

    #[test]
    fn retrieve_infers_sql_mode_from_select_keyword() {
        assert_eq!(
            normalize("retrieve", json!("SELECT * FROM reports")),
            json!({ "mode": "sql", "sql": "SELECT * FROM reports" })
        );
    }

    #[test]
    fn retrieve_infers_index_mode_otherwise() {
        assert_eq!(
            normalize("retrieve", json!("rust ownership")),
            json!({ "mode": "index", "query": "rust ownership" })
        );
    }

    #[test]
    fn job_id_alias_is_applied() {
        let args = apply_field_aliases("cancel_job", json!({ "jobId": "abc" }));
        assert_eq!(args, json!({ "job_id": "abc" }));
    }

    #[test]
    fn research_q_alias_is_applied() {
        let args = apply_field_aliases("research", json!({ "q": "rust" }));
        assert_eq!(args, json!({ "query": "rust" }));
    }
}
