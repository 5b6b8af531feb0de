use std::collections::HashSet;

use crate::checklist::ChecklistItem;
use crate::types::{CommitInfo, Confidence};

// --- Vocabulary ---

/// Common words that never count toward keyword overlap.
const STOP_WORDS: [&str; 30] = [
    "the", "and", "for", "with", "that", "this", "from", "into", "when", "then", "where", "should",
    "would", "could", "have", "has", "been", "are", "was", "were", "will", "its", "all", "any",
    "not", "but", "use", "using", "per", "via",
];

/// Checklist action verbs. Excluded from overlap (every task starts with
/// one), but their synonym groups expand matching against commit messages.
const ACTION_VERBS: [&str; 28] = [
    "add", "adds", "added", "adding", "update", "updates", "updated", "updating", "implement",
    "implements", "implemented", "implementing", "fix", "fixes", "fixed", "fixing", "create",
    "creates", "created", "creating", "write", "writes", "wrote", "written", "document",
    "documented", "ensure", "make",
];

const SYNONYM_GROUPS: [&[&str]; 5] = [
    &["add", "implement", "create", "introduce"],
    &["fix", "repair", "resolve", "correct"],
    &["write", "document", "describe"],
    &["update", "modify", "change", "revise"],
    &["remove", "delete", "drop"],
];

// --- Tokenization ---

/// Lowercase words of length >= 3, split on non-alphanumeric characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_string())
        .collect()
}

/// Task tokens that participate in overlap: tokenized, minus stop words and
/// action verbs, deduplicated. These form the overlap denominator.
fn keyword_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.as_str()) && !ACTION_VERBS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Expand a token set with synonym-group members: if any member of a group
/// is present, all members are.
fn expand_synonyms(tokens: &HashSet<String>) -> HashSet<String> {
    let mut expanded = tokens.clone();
    for group in SYNONYM_GROUPS {
        if group.iter().any(|w| tokens.contains(*w)) {
            for w in group.iter() {
                expanded.insert((*w).to_string());
            }
        }
    }
    expanded
}

// --- File matching ---

/// How strongly a filename mentioned in a task matches a changed file.
/// Ordered by specificity; only `Basename` unlocks the lowest overlap tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FileMatch {
    #[default]
    None,
    Substring,
    PathTail,
    Basename,
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extract tokens from a task that look like file references: backtick
/// spans, or words containing a path separator or an extension dot.
fn file_mentions(text: &str) -> Vec<String> {
    let mut mentions = Vec::new();

    // Backtick spans first; they are the author telling us it's a path.
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        match after.find('`') {
            Some(end) => {
                let span = &after[..end];
                if looks_like_path(span) {
                    mentions.push(span.to_string());
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }

    for word in text.split_whitespace() {
        let trimmed = word.trim_matches(|c: char| {
            matches!(c, '`' | '(' | ')' | ',' | ';' | ':' | '"' | '\'' | '*')
        });
        let trimmed = trimmed.trim_end_matches('.');
        if looks_like_path(trimmed) {
            mentions.push(trimmed.to_string());
        }
    }

    mentions.dedup();
    mentions
}

fn looks_like_path(s: &str) -> bool {
    if s.is_empty() || s.contains(char::is_whitespace) {
        return false;
    }
    if s.contains('/') {
        return true;
    }
    // A dot with word characters on both sides, e.g. `parser.py`.
    s.char_indices().any(|(i, c)| {
        c == '.'
            && i > 0
            && s[..i].chars().next_back().is_some_and(|p| p.is_ascii_alphanumeric())
            && s[i + 1..].chars().next().is_some_and(|n| n.is_ascii_alphanumeric())
    })
}

/// Best file-match tier between the task's file mentions and the changed
/// files: basename equality, then path tail, then substring.
fn best_file_match(task_text: &str, files: &[String]) -> FileMatch {
    let mentions = file_mentions(task_text);
    let mut best = FileMatch::None;
    for mention in &mentions {
        let mention_base = basename(mention);
        for file in files {
            let tier = if basename(file) == mention_base {
                FileMatch::Basename
            } else if file.ends_with(mention.as_str()) {
                FileMatch::PathTail
            } else if file.contains(mention.as_str()) {
                FileMatch::Substring
            } else {
                FileMatch::None
            };
            best = best.max(tier);
        }
    }
    best
}

// --- Scoring ---

/// Score for one unchecked task against the round's commits and files.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TaskScore {
    pub confidence: Confidence,
    /// Fraction of the task's keyword tokens found in commit messages.
    pub overlap: f64,
    pub file_match: FileMatch,
    pub matched_keywords: Vec<String>,
}

/// An unchecked task together with its score, carrying the checklist index
/// so the caller can address the original item.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskMatch {
    pub index: usize,
    pub text: String,
    pub score: TaskScore,
}

/// Score a single task text.
///
/// Overlap is `matched / keyword_count` where the denominator is the task's
/// own keyword tokens after stop-word and action-verb filtering. Commit
/// tokens are synonym-expanded before matching.
pub fn score_task(task_text: &str, commits: &[CommitInfo], files: &[String]) -> TaskScore {
    let keywords = keyword_tokens(task_text);

    let mut commit_tokens: HashSet<String> = HashSet::new();
    for commit in commits {
        commit_tokens.extend(tokenize(&commit.message));
    }
    let commit_tokens = expand_synonyms(&commit_tokens);

    let matched: Vec<String> = keywords
        .iter()
        .filter(|k| commit_tokens.contains(*k))
        .cloned()
        .collect();

    let overlap = if keywords.is_empty() {
        0.0
    } else {
        matched.len() as f64 / keywords.len() as f64
    };

    let file_match = best_file_match(task_text, files);

    let confidence = classify_confidence(overlap, file_match);

    TaskScore {
        confidence,
        overlap,
        file_match,
        matched_keywords: matched,
    }
}

/// Confidence rules:
/// - high: overlap >= 50%, or >= 35% with any file match, or >= 25% with an
///   exact-basename match
/// - medium: overlap >= 25%, or below that with any file match
/// - low: any non-zero overlap
/// - none: otherwise
fn classify_confidence(overlap: f64, file_match: FileMatch) -> Confidence {
    let has_file = file_match != FileMatch::None;
    if overlap >= 0.50
        || (overlap >= 0.35 && has_file)
        || (overlap >= 0.25 && file_match == FileMatch::Basename)
    {
        Confidence::High
    } else if overlap >= 0.25 || has_file {
        Confidence::Medium
    } else if overlap > 0.0 {
        Confidence::Low
    } else {
        Confidence::None
    }
}

/// Score every unchecked task in a checklist. Checked tasks are skipped and
/// never revisited.
pub fn score_unchecked_tasks(
    tasks: &[ChecklistItem],
    commits: &[CommitInfo],
    files: &[String],
) -> Vec<TaskMatch> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.checked && !item.text.trim().is_empty())
        .map(|(index, item)| TaskMatch {
            index,
            text: item.text.clone(),
            score: score_task(&item.text, commits, files),
        })
        .collect()
}
