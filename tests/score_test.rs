mod common;

use common::make_commit;
use pr_keepalive::checklist::parse_sections;
use pr_keepalive::score::{score_task, score_unchecked_tasks, tokenize, FileMatch};
use pr_keepalive::types::Confidence;

// --- Tokenization ---

#[test]
fn tokenize_lowercases_and_drops_short_words()
{
    let tokens = tokenize("Fix THE retry-loop in v2");
    assert!(tokens.contains(&"fix".to_string()));
    assert!(tokens.contains(&"retry".to_string()));
    assert!(tokens.contains(&"loop".to_string()));
    assert!(!tokens.contains(&"in".to_string()));
    assert!(!tokens.contains(&"v2".to_string()));
}

// --- Overlap thresholds (pinned fixtures) ---

#[test]
fn half_overlap_is_high_without_files() {
    // Keywords: retry, backoff, jitter, classifier (4). Commits hit 2 => 50%.
    let score = score_task(
        "Add retry backoff jitter classifier",
        &[make_commit("c1", "implement retry with backoff")],
        &[],
    );
    assert!(score.overlap >= 0.5, "overlap {}", score.overlap);
    assert_eq!(score.confidence, Confidence::High);
}

#[test]
fn thirtyfive_percent_with_file_match_is_high() {
    // Keywords: parser, sections, aliases, headings, blockquote, nesting,
    // markers, glyphs (8, `parser.rs` re-tokenizes to the existing
    // "parser"). Commits hit 3 => 37.5%.
    let score = score_task(
        "Update parser sections aliases headings blockquote nesting markers glyphs in `parser.rs`",
        &[make_commit("c1", "handle sections aliases headings")],
        &["legacy/parser.rs.bak".to_string()],
    );
    assert!(
        score.overlap >= 0.35 && score.overlap < 0.5,
        "overlap {}",
        score.overlap
    );
    assert_eq!(score.file_match, FileMatch::Substring);
    assert_eq!(score.confidence, Confidence::High);
}

#[test]
fn quarter_overlap_with_basename_match_is_high() {
    // Keywords: rework, codec, sentinel, merge, spread, errors, capped,
    // handling, state (9). Commits hit 3 => 33%.
    let score = score_task(
        "Rework codec sentinel merge spread errors capped handling in `state.rs`",
        &[make_commit("c1", "adjust codec sentinel errors")],
        &["src/state.rs".to_string()],
    );
    assert!(
        (0.25..0.35).contains(&score.overlap),
        "overlap {}",
        score.overlap
    );
    assert_eq!(score.file_match, FileMatch::Basename);
    assert_eq!(score.confidence, Confidence::High);
}

#[test]
fn quarter_overlap_without_files_is_medium() {
    // Keywords: codec, sentinel, merge, spread (4). Commits hit 1 => 25%.
    let score = score_task(
        "Codec sentinel merge spread",
        &[make_commit("c1", "adjust codec internals")],
        &[],
    );
    assert!(
        (0.25..0.35).contains(&score.overlap),
        "overlap {}",
        score.overlap
    );
    assert_eq!(score.confidence, Confidence::Medium);
}

#[test]
fn low_overlap_with_file_match_is_medium() {
    let score = score_task(
        "Polish `render.rs` output spacing widths alignment paddings",
        &[make_commit("c1", "tweak spacing")],
        &["src/render.rs".to_string()],
    );
    assert!(score.overlap < 0.25, "overlap {}", score.overlap);
    assert_eq!(score.confidence, Confidence::Medium);
}

#[test]
fn tiny_overlap_alone_is_low() {
    let score = score_task(
        "Improve scheduler fairness heuristics windowing decay",
        &[make_commit("c1", "notes on scheduler")],
        &[],
    );
    assert!(score.overlap > 0.0 && score.overlap < 0.25);
    assert_eq!(score.confidence, Confidence::Low);
}

#[test]
fn zero_signal_is_none() {
    let score = score_task(
        "Improve onboarding journey",
        &[make_commit("c1", "bump version")],
        &[],
    );
    assert_eq!(score.overlap, 0.0);
    assert_eq!(score.file_match, FileMatch::None);
    assert_eq!(score.confidence, Confidence::None);
}

// --- Synonyms ---

#[test]
fn synonym_groups_bridge_verb_choices() {
    // Task says "resolve", commit says "fix": same synonym group.
    let score = score_task(
        "Resolve flaky teardown",
        &[make_commit("c1", "fix flaky teardown in suite")],
        &[],
    );
    assert_eq!(score.confidence, Confidence::High, "score {:?}", score);
}

// --- File match tiers ---

#[test]
fn file_tiers_are_ordered() {
    let basename = score_task(
        "Touch `api/handlers.py` carefully",
        &[],
        &["src/api/handlers.py".to_string()],
    );
    assert_eq!(basename.file_match, FileMatch::Basename);

    let tail = score_task(
        "Touch `handlers.py` carefully",
        &[],
        &["src/api/myhandlers.py".to_string()],
    );
    assert_eq!(tail.file_match, FileMatch::PathTail);

    let substring = score_task(
        "Touch `api/handlers.py` carefully",
        &[],
        &["deep/nested/api/handlers.py2".to_string()],
    );
    assert_eq!(substring.file_match, FileMatch::Substring);

    let none = score_task(
        "Touch `api/handlers.py` carefully",
        &[],
        &["docs/readme.md".to_string()],
    );
    assert_eq!(none.file_match, FileMatch::None);
}

// --- Checklist integration ---

#[test]
fn only_unchecked_tasks_are_scored() {
    let sections = parse_sections(
        "## Tasks\n\n- [x] already done retry backoff\n- [ ] pending retry backoff\n",
    );
    let matches = score_unchecked_tasks(
        &sections.tasks,
        &[make_commit("c1", "retry backoff work")],
        &[],
    );
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].index, 1);
    assert_eq!(matches[0].text, "pending retry backoff");
}
