//! Two-stage parse of judge output into a validated [`Review`].
//!
//! Stage one scans the JSON-lines stream for an `agent_message` envelope and
//! parses the JSON object embedded in its message string. Stage two falls
//! back to treating the whole response as one JSON document. Whatever
//! candidate survives the shape check then goes through strict validation;
//! any accumulated violation rejects the response. Repairs happen nowhere
//! here.

use serde_json::Value;
use tracing::debug;

use gavel_core::types::{DimensionScore, InlineComment, JudgeCard, Review, ReviewBody, Verdict};
use gavel_core::AuditError;

/// Parse raw judge output into a canonical review.
pub fn parse_review(raw: &str) -> Result<Review, AuditError> {
    // The first agent-message object that parses but fails the shape check;
    // kept so strict validation can report precise violations when no line
    // yields an acceptable candidate.
    let mut shaped_reject: Option<Value> = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(envelope) = serde_json::from_str::<Value>(line) else {
            debug!("ignoring non-JSON line in judge output");
            continue;
        };
        let Some(message) = agent_message(&envelope) else {
            continue;
        };
        if let Ok(direct) = serde_json::from_str::<Value>(message) {
            if shape_check(&direct) {
                return validate_candidate(&direct, raw);
            }
            shaped_reject.get_or_insert(direct);
            continue;
        }
        if let Some(extracted) = extract_balanced_object(message) {
            if let Ok(parsed) = serde_json::from_str::<Value>(extracted) {
                if shape_check(&parsed) {
                    return validate_candidate(&parsed, raw);
                }
                shaped_reject.get_or_insert(parsed);
            }
        }
    }

    // An agent message was found but failed the shape check: validate it so
    // the rejection names every violation.
    if let Some(candidate) = shaped_reject {
        return validate_candidate(&candidate, raw);
    }

    // Fallback: no agent-message line at all; treat the whole response as a
    // single document and validate whatever it holds.
    if let Ok(whole) = serde_json::from_str::<Value>(raw.trim()) {
        if whole.is_object() {
            return validate_candidate(&whole, raw);
        }
    }

    Err(AuditError::Response {
        message: "no parsable review found in judge output".into(),
        raw_response: raw.to_string(),
    })
}

/// `{"msg": {"type": "agent_message", "message": "..."}}`
fn agent_message(envelope: &Value) -> Option<&str> {
    let msg = envelope.get("msg")?;
    if msg.get("type")?.as_str()? != "agent_message" {
        return None;
    }
    msg.get("message")?.as_str()
}

/// Minimal pre-acceptance check: a plausible overall score and verdict.
fn shape_check(value: &Value) -> bool {
    let Some(overall) = value.get("overall").and_then(Value::as_f64) else {
        return false;
    };
    if !overall.is_finite() || !(0.0..=100.0).contains(&overall) {
        return false;
    }
    matches!(
        value.get("verdict").and_then(Value::as_str),
        Some("pass" | "revise" | "reject")
    )
}

/// First balanced `{...}` substring, honoring strings and escapes.
fn extract_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate a numeric score field, recording range violations.
fn validate_score(value: Option<&Value>, label: &str, errors: &mut Vec<String>) -> Option<u32> {
    let Some(number) = value.and_then(Value::as_f64) else {
        errors.push(format!("{label} missing or not a number"));
        return None;
    };
    if !number.is_finite() {
        errors.push(format!("{label} is not finite"));
        return None;
    }
    if !(0.0..=100.0).contains(&number) {
        errors.push(format!("{label} score out of range: {number}"));
        return None;
    }
    Some(number.round() as u32)
}

/// Strict, error-accumulating validation. All violations are collected
/// before the response is rejected.
fn validate_candidate(value: &Value, raw: &str) -> Result<Review, AuditError> {
    let mut errors = Vec::new();

    let overall = validate_score(value.get("overall"), "overall", &mut errors);

    let verdict = match value.get("verdict").and_then(Value::as_str) {
        Some("pass") => Some(Verdict::Pass),
        Some("revise") => Some(Verdict::Revise),
        Some("reject") => Some(Verdict::Reject),
        Some(other) => {
            errors.push(format!(
                "verdict must be one of pass, revise, reject; got '{other}'"
            ));
            None
        }
        None => {
            errors.push("verdict missing or not a string".into());
            None
        }
    };

    let mut dimensions = Vec::new();
    match value.get("dimensions").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => {
            for (i, item) in list.iter().enumerate() {
                let name = item.get("name").and_then(Value::as_str);
                let score =
                    validate_score(item.get("score"), &format!("dimensions[{i}]"), &mut errors);
                match (name, score) {
                    (Some(name), Some(score)) if !name.is_empty() => {
                        dimensions.push(DimensionScore {
                            name: name.to_string(),
                            score,
                        });
                    }
                    (Some(_), Some(_)) | (None, _) => {
                        errors.push(format!("dimensions[{i}] has a missing or empty name"));
                    }
                    _ => {}
                }
            }
        }
        Some(_) => errors.push("dimensions must not be empty".into()),
        None => errors.push("dimensions missing or not an array".into()),
    }

    let review_obj = value.get("review");
    let summary = match review_obj
        .and_then(|r| r.get("summary"))
        .and_then(Value::as_str)
    {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        Some(_) => {
            errors.push("review.summary must not be empty".into());
            None
        }
        None => {
            errors.push("review.summary missing".into());
            None
        }
    };

    let mut inline = Vec::new();
    if let Some(list) = review_obj.and_then(|r| r.get("inline")).and_then(Value::as_array) {
        for (i, item) in list.iter().enumerate() {
            let path = item.get("path").and_then(Value::as_str);
            let line = item.get("line").and_then(Value::as_u64);
            let comment = item.get("comment").and_then(Value::as_str);
            match (path, line, comment) {
                (Some(path), Some(line), Some(comment)) if line >= 1 => {
                    inline.push(InlineComment {
                        path: path.to_string(),
                        line: line as u32,
                        comment: comment.to_string(),
                    });
                }
                _ => errors.push(format!("review.inline[{i}] is malformed; dropped")),
            }
        }
    }

    let mut citations = Vec::new();
    if let Some(list) = review_obj
        .and_then(|r| r.get("citations"))
        .and_then(Value::as_array)
    {
        for (i, item) in list.iter().enumerate() {
            match item.as_str() {
                Some(s) => citations.push(s.to_string()),
                None => errors.push(format!("review.citations[{i}] is not a string; dropped")),
            }
        }
    }

    let iterations = match value.get("iterations") {
        None | Some(Value::Null) => 1,
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => n as u32,
            _ => {
                errors.push("iterations must be a positive integer".into());
                1
            }
        },
    };

    let mut judge_cards = Vec::new();
    match value.get("judge_cards").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => {
            for (i, item) in list.iter().enumerate() {
                let model = item.get("model").and_then(Value::as_str);
                let score =
                    validate_score(item.get("score"), &format!("judge_cards[{i}]"), &mut errors);
                let notes = match item.get("notes") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(_) => {
                        errors.push(format!("judge_cards[{i}].notes is not a string"));
                        None
                    }
                };
                match (model, score) {
                    (Some(model), Some(score)) => judge_cards.push(JudgeCard {
                        model: model.to_string(),
                        score,
                        notes,
                    }),
                    (None, _) => errors.push(format!("judge_cards[{i}].model missing")),
                    _ => {}
                }
            }
        }
        Some(_) => errors.push("judge_cards must not be empty".into()),
        None => errors.push("judge_cards missing or not an array".into()),
    }

    let proposed_diff = match value.get("proposed_diff") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("proposed_diff must be a string or null".into());
            None
        }
    };

    if !errors.is_empty() {
        return Err(AuditError::Response {
            message: format!("Response validation failed: {}", errors.join("; ")),
            raw_response: raw.to_string(),
        });
    }

    Ok(Review {
        overall: overall.expect("validated"),
        dimensions,
        verdict: verdict.expect("validated"),
        review: ReviewBody {
            summary: summary.expect("validated"),
            inline,
            citations,
        },
        proposed_diff,
        iterations,
        judge_cards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = r#"{"overall":88,"dimensions":[{"name":"accuracy","score":90},{"name":"completeness","score":85},{"name":"clarity","score":92},{"name":"actionability","score":80},{"name":"human_likeness","score":93}],"verdict":"pass","review":{"summary":"ok","inline":[],"citations":[]},"proposed_diff":null,"iterations":1,"judge_cards":[{"model":"codex-cli","score":88}]}"#;

    fn agent_line(payload: &str) -> String {
        serde_json::to_string(&serde_json::json!({
            "msg": {"type": "agent_message", "message": payload}
        }))
        .unwrap()
    }

    #[test]
    fn test_parses_agent_message_line() {
        let raw = format!(
            "{}\n{}\n{}",
            r#"{"msg":{"type":"task_started"}}"#,
            agent_line(CANONICAL),
            r#"{"msg":{"type":"token_count","count":512}}"#,
        );
        let review = parse_review(&raw).unwrap();
        assert_eq!(review.overall, 88);
        assert_eq!(review.verdict, Verdict::Pass);
        assert_eq!(review.dimensions.len(), 5);
        assert_eq!(review.judge_cards[0].model, "codex-cli");
    }

    #[test]
    fn test_ignores_unparsable_lines() {
        let raw = format!("plain text preamble\nnot json either\n{}", agent_line(CANONICAL));
        assert!(parse_review(&raw).is_ok());
    }

    #[test]
    fn test_extracts_object_embedded_in_prose() {
        let message = format!("Here is my review:\n{CANONICAL}\nHope that helps!");
        let raw = agent_line(&message);
        let review = parse_review(&raw).unwrap();
        assert_eq!(review.overall, 88);
    }

    #[test]
    fn test_whole_document_fallback() {
        let review = parse_review(CANONICAL).unwrap();
        assert_eq!(review.overall, 88);
    }

    #[test]
    fn test_parser_idempotence_on_canonical_review() {
        let review = parse_review(CANONICAL).unwrap();
        let serialized = serde_json::to_string(&review).unwrap();
        let reparsed = parse_review(&serialized).unwrap();
        assert_eq!(reparsed, review);
    }

    #[test]
    fn test_empty_output_is_rejected() {
        let err = parse_review("").unwrap_err();
        assert!(matches!(err, AuditError::Response { .. }));
    }

    #[test]
    fn test_out_of_range_overall_is_rejected_not_clamped() {
        for bad in ["-5", "101"] {
            let doc = CANONICAL.replace("\"overall\":88", &format!("\"overall\":{bad}"));
            let err = parse_review(&doc).unwrap_err();
            let AuditError::Response { message, .. } = err else {
                panic!("expected a response error");
            };
            assert!(message.contains("out of range"), "message: {message}");
        }
    }

    #[test]
    fn test_empty_dimensions_is_rejected() {
        let doc = CANONICAL.replace(
            r#""dimensions":[{"name":"accuracy","score":90},{"name":"completeness","score":85},{"name":"clarity","score":92},{"name":"actionability","score":80},{"name":"human_likeness","score":93}]"#,
            r#""dimensions":[]"#,
        );
        let err = parse_review(&doc).unwrap_err();
        assert!(err.to_string().contains("dimensions"));
    }

    #[test]
    fn test_unknown_verdict_is_rejected() {
        let doc = CANONICAL.replace(r#""verdict":"pass""#, r#""verdict":"maybe""#);
        let err = parse_review(&doc).unwrap_err();
        assert!(matches!(err, AuditError::Response { .. }));
    }

    #[test]
    fn test_missing_verdict_in_agent_message_is_rejected() {
        let doc = CANONICAL.replace(r#""verdict":"pass","#, "");
        let raw = agent_line(&doc);
        let err = parse_review(&raw).unwrap_err();
        let AuditError::Response { raw_response, .. } = err else {
            panic!("expected a response error");
        };
        assert_eq!(raw_response, raw);
    }

    #[test]
    fn test_missing_summary_is_rejected() {
        let doc = CANONICAL.replace(r#""summary":"ok","#, "");
        let err = parse_review(&doc).unwrap_err();
        assert!(err.to_string().contains("review.summary"));
    }

    #[test]
    fn test_malformed_inline_entry_is_rejected() {
        let doc = CANONICAL.replace(
            r#""inline":[]"#,
            r#""inline":[{"path":"src/lib.rs","line":0,"comment":"x"}]"#,
        );
        let err = parse_review(&doc).unwrap_err();
        assert!(err.to_string().contains("inline"));
    }

    #[test]
    fn test_fractional_scores_are_rounded() {
        let doc = CANONICAL
            .replace("\"overall\":88", "\"overall\":87.6")
            .replace(
                r#"{"name":"accuracy","score":90}"#,
                r#"{"name":"accuracy","score":89.4}"#,
            );
        let review = parse_review(&doc).unwrap();
        assert_eq!(review.overall, 88);
        assert_eq!(review.dimensions[0].score, 89);
    }

    #[test]
    fn test_iterations_defaults_to_one_when_absent() {
        let doc = CANONICAL.replace(r#""iterations":1,"#, "");
        let review = parse_review(&doc).unwrap();
        assert_eq!(review.iterations, 1);
    }

    #[test]
    fn test_non_integer_iterations_is_rejected() {
        let doc = CANONICAL.replace(r#""iterations":1"#, r#""iterations":1.5"#);
        assert!(parse_review(&doc).is_err());
    }

    #[test]
    fn test_errors_accumulate_across_fields() {
        let doc = CANONICAL
            .replace(r#""verdict":"pass""#, r#""verdict":"maybe""#)
            .replace(r#""summary":"ok","#, "")
            .replace(r#""judge_cards":[{"model":"codex-cli","score":88}]"#, r#""judge_cards":[]"#);
        let err = parse_review(&doc).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("verdict"));
        assert!(message.contains("review.summary"));
        assert!(message.contains("judge_cards"));
    }

    #[test]
    fn test_proposed_diff_accepts_string_and_null() {
        let with_diff = CANONICAL.replace(
            r#""proposed_diff":null"#,
            r#""proposed_diff":"--- a/x\n+++ b/x""#,
        );
        let review = parse_review(&with_diff).unwrap();
        assert!(review.proposed_diff.is_some());

        let review = parse_review(CANONICAL).unwrap();
        assert!(review.proposed_diff.is_none());
    }

    #[test]
    fn test_balanced_brace_scan_honors_strings() {
        let tricky = r#"noise {"overall":70,"dimensions":[{"name":"a","score":70}],"verdict":"revise","review":{"summary":"brace } in string","inline":[],"citations":[]},"iterations":1,"judge_cards":[{"model":"m","score":70}]} trailing"#;
        let extracted = extract_balanced_object(tricky).unwrap();
        let review = parse_review(extracted).unwrap();
        assert_eq!(review.review.summary, "brace } in string");
    }
}
