//! Code-likeness detection and submission-format validation.
//!
//! The detector decides whether a thought needs auditing at all; the format
//! validator flags fence problems and cleans what it can. Format issues are
//! advisory; they never abort an audit.

use std::sync::OnceLock;

/// Keywords that mark a submission as code-bearing.
const CODE_KEYWORDS: &[&str] = &[
    "function", "class", "import", "export", "const", "let", "var", "def", "fn", "struct",
    "impl",
];

/// Language identifiers the format validator recognizes on fences.
const KNOWN_LANGUAGES: &[&str] = &[
    "", "ts", "typescript", "js", "javascript", "jsx", "tsx", "py", "python", "rust", "rs",
    "go", "java", "c", "cpp", "sh", "bash", "shell", "json", "yaml", "toml", "sql", "html",
    "css", "md", "markdown", "txt", "text", "diff",
];

/// The audit-required heuristic: fenced blocks, inline backticks, code
/// keywords, type annotations, or comment markers.
pub fn contains_code_like_content(text: &str) -> bool {
    if text.contains('`') {
        return true;
    }
    if text.contains("//") || text.contains("/*") {
        return true;
    }
    if keyword_regex().is_match(text) {
        return true;
    }
    type_annotation_regex().is_match(text)
}

fn keyword_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"\b(?:{})\b", CODE_KEYWORDS.join("|"));
        regex::Regex::new(&pattern).expect("keyword regex compiles")
    })
}

fn type_annotation_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r"\w+\s*:\s*(?:string|number|boolean|void|any|str|int|float|bool|u32|i32|u64|i64|f32|f64|usize)\b",
        )
        .expect("annotation regex compiles")
    })
}

/// Detected shape of the submission text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFormat {
    Markdown,
    TypeScript,
    JavaScript,
    Python,
    Plain,
}

impl SubmissionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionFormat::Markdown => "markdown",
            SubmissionFormat::TypeScript => "typescript",
            SubmissionFormat::JavaScript => "javascript",
            SubmissionFormat::Python => "python",
            SubmissionFormat::Plain => "plain",
        }
    }
}

/// Format verdict plus cleaned text the audit proceeds with.
#[derive(Debug, Clone)]
pub struct FormatReport {
    pub format: SubmissionFormat,
    pub issues: Vec<String>,
    pub cleaned: String,
}

/// Scan fences, flag nesting/emptiness/unknown languages, and produce a
/// cleaned rendition (empty blocks dropped, unclosed fences closed).
pub fn validate_format(text: &str) -> FormatReport {
    let mut issues = Vec::new();
    let mut cleaned_lines: Vec<&str> = Vec::new();
    let mut fence_langs: Vec<String> = Vec::new();

    let mut open_lang: Option<String> = None;
    let mut open_fence_index: Option<usize> = None;
    let mut block_line_count = 0usize;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix("```") {
            let info = info.trim().to_ascii_lowercase();
            match open_lang {
                None => {
                    open_lang = Some(info.clone());
                    open_fence_index = Some(cleaned_lines.len());
                    block_line_count = 0;
                    cleaned_lines.push(line);
                    if !info.is_empty() {
                        fence_langs.push(info.clone());
                        if !KNOWN_LANGUAGES.contains(&info.as_str()) {
                            issues.push(format!("unsupported fence language '{info}'"));
                        }
                    }
                }
                Some(_) if !info.is_empty() => {
                    // An opening fence while one is already open.
                    issues.push(format!("nested code fence with language '{info}'"));
                    block_line_count += 1;
                    cleaned_lines.push(line);
                }
                Some(_) => {
                    if block_line_count == 0 {
                        issues.push("empty fenced code block".to_string());
                        // Drop the opening fence and skip the closing one.
                        if let Some(start) = open_fence_index {
                            cleaned_lines.truncate(start);
                        }
                    } else {
                        cleaned_lines.push(line);
                    }
                    open_lang = None;
                    open_fence_index = None;
                }
            }
        } else {
            if open_lang.is_some() {
                block_line_count += 1;
            }
            cleaned_lines.push(line);
        }
    }

    let mut cleaned = cleaned_lines.join("\n");
    if open_lang.is_some() {
        issues.push("unclosed code fence".to_string());
        cleaned.push_str("\n```");
    }

    let format = detect_format(text, &fence_langs);
    FormatReport {
        format,
        issues,
        cleaned,
    }
}

fn detect_format(text: &str, fence_langs: &[String]) -> SubmissionFormat {
    for lang in fence_langs {
        match lang.as_str() {
            "ts" | "typescript" | "tsx" => return SubmissionFormat::TypeScript,
            "js" | "javascript" | "jsx" => return SubmissionFormat::JavaScript,
            "py" | "python" => return SubmissionFormat::Python,
            _ => {}
        }
    }
    if text.contains("```") || text.lines().any(|l| l.starts_with('#') && l.contains(' ')) {
        return SubmissionFormat::Markdown;
    }
    if text.contains("def ") && text.contains(':') {
        return SubmissionFormat::Python;
    }
    if type_annotation_regex().is_match(text) {
        return SubmissionFormat::TypeScript;
    }
    if keyword_regex().is_match(text) {
        return SubmissionFormat::JavaScript;
    }
    SubmissionFormat::Plain
}
