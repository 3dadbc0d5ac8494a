//! Audit prompt rendering and input sanitization.

use gavel_core::{AuditRequest, Verdict};

/// Strip C0 control characters (keeping tab, newline, CR) and escape the
/// characters a shell-adjacent judge could interpret.
pub fn sanitize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '`' => out.push_str("\\`"),
            '$' => out.push_str("\\$"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

/// Render the audit prompt the judge receives as its positional argument.
///
/// The prompt carries the task, the fenced candidate, optional context, the
/// rubric with weights, the budget, the verdict thresholds, and the exact
/// JSON shape the judge must emit. The caller validates the request first.
pub fn build_audit_prompt(request: &AuditRequest) -> String {
    let mut prompt = String::with_capacity(
        request.task.len() + request.candidate.len() + request.context_pack.len() + 2048,
    );

    prompt.push_str(
        "You are a strict code auditor. Audit the candidate below against the task and rubric.\n\
         Respond with ONLY a single JSON object matching the response schema. No prose, no fences.\n\n",
    );

    prompt.push_str("## Task\n");
    prompt.push_str(&sanitize_text(&request.task));
    prompt.push_str("\n\n## Candidate\n```\n");
    prompt.push_str(&sanitize_text(&request.candidate));
    prompt.push_str("\n```\n");

    if !request.context_pack.is_empty() {
        prompt.push_str("\n## Repository context\n");
        prompt.push_str(&sanitize_text(&request.context_pack));
        prompt.push('\n');
    }

    prompt.push_str("\n## Rubric\nScore each dimension from 0 to 100:\n");
    for dim in &request.rubric {
        prompt.push_str(&format!("- {} (weight {})", dim.name, dim.weight));
        if !dim.description.is_empty() {
            prompt.push_str(": ");
            prompt.push_str(&sanitize_text(&dim.description));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\n## Budget\nMax cycles: {}. Candidates considered: {}. Completion threshold: {}.\n",
        request.budget.max_cycles, request.budget.candidates, request.budget.threshold
    ));

    prompt.push_str(&format!(
        "\n## Verdict\n\
         - \"{}\" when overall >= {} and no blocking defect remains\n\
         - \"{}\" when the candidate is salvageable but below the threshold\n\
         - \"{}\" when the approach is fundamentally wrong\n",
        Verdict::Pass,
        request.budget.threshold,
        Verdict::Revise,
        Verdict::Reject
    ));

    prompt.push_str(
        "\n## Response schema\n\
         {\n\
           \"overall\": <integer 0-100>,\n\
           \"dimensions\": [{\"name\": <rubric dimension>, \"score\": <integer 0-100>}, ...],\n\
           \"verdict\": \"pass\" | \"revise\" | \"reject\",\n\
           \"review\": {\n\
             \"summary\": <non-empty string>,\n\
             \"inline\": [{\"path\": <string>, \"line\": <integer >= 1>, \"comment\": <string>}, ...],\n\
             \"citations\": [<string>, ...]\n\
           },\n\
           \"proposed_diff\": <string or null>,\n\
           \"iterations\": <integer >= 1>,\n\
           \"judge_cards\": [{\"model\": <string>, \"score\": <integer 0-100>, \"notes\": <optional string>}, ...]\n\
         }\n",
    );

    prompt
}
