use quickcheck::{Arbitrary, Gen};

use pr_keepalive::checklist::{
    count_checkboxes, parse_sections, render_item, render_sections, toggle_checkbox,
    ChecklistItem, AUTO_SUMMARY_END, AUTO_SUMMARY_START,
};

// --- Section recognition ---

#[test]
fn recognizes_canonical_sections() {
    let body = "\
## Scope

Make login faster.

## Tasks

- [ ] profile the login path
- [x] cache the session token

## Acceptance Criteria

- [ ] p95 under 200ms
";
    let sections = parse_sections(body);
    assert_eq!(sections.scope.as_deref(), Some("Make login faster."));
    assert_eq!(sections.tasks.len(), 2);
    assert!(sections.tasks[1].checked);
    assert_eq!(sections.acceptance.len(), 1);
}

#[test]
fn recognizes_alias_headings() {
    let body = "\
## Why

Latency hurts.

**To Do**

- [ ] profile it

> ## Definition of done

- [ ] fast enough
";
    let sections = parse_sections(body);
    assert_eq!(sections.scope.as_deref(), Some("Latency hurts."));
    assert_eq!(sections.tasks.len(), 1);
    assert_eq!(sections.acceptance.len(), 1);
}

#[test]
fn unrecognized_heading_ends_a_section() {
    let body = "\
## Tasks

- [ ] real task

## Rollout plan

- [ ] not a task
";
    let sections = parse_sections(body);
    assert_eq!(sections.tasks.len(), 1);
    assert_eq!(sections.tasks[0].text, "real task");
}

#[test]
fn restricts_to_auto_summary_region_when_present() {
    let body = format!(
        "## Tasks\n\n- [ ] outside\n\n{}\n## Tasks\n\n- [ ] inside\n{}\n",
        AUTO_SUMMARY_START, AUTO_SUMMARY_END
    );
    let sections = parse_sections(&body);
    assert_eq!(sections.tasks.len(), 1);
    assert_eq!(sections.tasks[0].text, "inside");
}

// --- Normalization ---

#[test]
fn bare_items_gain_unchecked_boxes() {
    let body = "## Tasks\n\n- profile the login path\n* another one\n3. numbered\n";
    let sections = parse_sections(body);
    assert_eq!(sections.tasks.len(), 3);
    assert!(sections.tasks.iter().all(|t| !t.checked));
    assert_eq!(render_item(&sections.tasks[0]), "- [ ] profile the login path");
    assert_eq!(render_item(&sections.tasks[1]), "* [ ] another one");
    assert_eq!(render_item(&sections.tasks[2]), "3. [ ] numbered");
}

#[test]
fn indentation_is_preserved() {
    let body = "## Tasks\n\n- [ ] parent\n  - [ ] child\n";
    let sections = parse_sections(body);
    assert_eq!(render_item(&sections.tasks[1]), "  - [ ] child");
}

#[test]
fn scope_is_not_checkbox_normalized() {
    let body = "## Scope\n\n- plain scope bullet\n\n## Tasks\n\n- [ ] t\n";
    let sections = parse_sections(body);
    assert_eq!(sections.scope.as_deref(), Some("- plain scope bullet"));
}

// --- Inference ---

#[test]
fn untitled_checkbox_list_becomes_tasks() {
    let body = "Some intro prose.\n\n- [ ] first\n- [x] second\n";
    let sections = parse_sections(body);
    assert_eq!(sections.tasks.len(), 2);
    assert!(sections.tasks[1].checked);
}

#[test]
fn trailing_list_after_acceptance_phrase_is_promoted() {
    let body = "\
## Tasks

- [ ] build it

We agreed these are the acceptance criteria:
- works offline
- loads fast
";
    let sections = parse_sections(body);
    assert_eq!(sections.acceptance.len(), 2);
    assert_eq!(sections.acceptance[0].text, "works offline");
}

#[test]
fn promoted_acceptance_items_are_not_double_counted_as_tasks() {
    let body = "The acceptance criteria:\n- [ ] only one\n";
    let sections = parse_sections(body);
    assert_eq!(sections.acceptance.len(), 1);
    assert!(sections.tasks.is_empty());
    assert_eq!(sections.counts().total, 1);
}

// --- Counting ---

#[test]
fn counting_skips_fenced_code_blocks() {
    let body = "\
- [ ] real
```
- [ ] fenced, not counted
```
- [x] also real
";
    let counts = count_checkboxes(body);
    assert_eq!(counts.total, 2);
    assert_eq!(counts.checked, 1);
    assert_eq!(counts.unchecked, 1);
}

#[test]
fn checkbox_needs_visible_text() {
    let counts = count_checkboxes("- [ ]\n- [ ] real\n");
    assert_eq!(counts.total, 1);
}

#[test]
fn uppercase_x_counts_as_checked() {
    let counts = count_checkboxes("- [X] shouted\n");
    assert_eq!(counts.checked, 1);
}

// --- Toggling ---

#[test]
fn toggle_edits_only_the_matching_line() {
    let body = "intro\n- [ ] target task\n- [ ] other task\n";
    let toggled = toggle_checkbox(body, "target task").unwrap();
    assert_eq!(toggled, "intro\n- [x] target task\n- [ ] other task\n");
}

#[test]
fn toggle_never_unchecks() {
    let body = "- [x] already done\n";
    assert_eq!(toggle_checkbox(body, "already done"), None);
}

#[test]
fn toggle_ignores_fenced_lookalikes() {
    let body = "```\n- [ ] fenced\n```\n- [ ] fenced\n";
    let toggled = toggle_checkbox(body, "fenced").unwrap();
    assert_eq!(toggled, "```\n- [ ] fenced\n```\n- [x] fenced\n");
}

// --- Round-trip law ---

#[test]
fn parse_render_parse_is_identity_on_fixtures() {
    let bodies = [
        "## Tasks\n\n- [ ] a\n- plain\n\n## Acceptance Criteria\n\n1. [x] b\n",
        "**Why**\n\nreasons\n\n**Task**\n\n* item one\n* [X] item two\n",
        "- [ ] orphan one\n- [ ] orphan two\n",
        "## Scope\n\ntext\n\n\n\nmore text after blanks\n\n## Tasks\n\n- [ ] t\n",
    ];
    for body in bodies {
        let once = parse_sections(body);
        let twice = parse_sections(&render_sections(&once));
        assert_eq!(once, twice, "body: {:?}", body);
    }
}

// --- Property test: the round-trip law over generated bodies ---

#[derive(Clone, Debug)]
struct BodyFixture(String);

const WORDS: [&str; 12] = [
    "parser", "cache", "login", "retry", "worker", "flag", "config", "token", "index", "queue",
    "widget", "deploy",
];

fn pick<'a, T>(g: &mut Gen, options: &'a [T]) -> &'a T {
    g.choose(options).expect("non-empty options")
}

fn item_line(g: &mut Gen) -> String {
    let marker = *pick(g, &["-", "*", "+", "1.", "2)"]);
    let glyph = *pick(g, &["", "[ ] ", "[x] ", "[X] "]);
    let word_a = pick(g, &WORDS);
    let word_b = pick(g, &WORDS);
    if glyph.is_empty() {
        format!("{} {} {}", marker, word_a, word_b)
    } else {
        format!("{} {}{} {}", marker, glyph, word_a, word_b)
    }
}

impl Arbitrary for BodyFixture {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut blocks = Vec::new();

        if bool::arbitrary(g) {
            let heading = *pick(g, &["## Scope", "**Why**", "Background"]);
            blocks.push(format!("{}\n\n{} {}", heading, pick(g, &WORDS), pick(g, &WORDS)));
        }

        let tasks_heading = *pick(g, &["## Tasks", "**To Do**", "## Task"]);
        let mut task_lines = Vec::new();
        for _ in 0..(usize::arbitrary(g) % 4 + 1) {
            task_lines.push(item_line(g));
        }
        blocks.push(format!("{}\n\n{}", tasks_heading, task_lines.join("\n")));

        if bool::arbitrary(g) {
            let heading = *pick(g, &["## Acceptance Criteria", "## Definition of done"]);
            let mut lines = Vec::new();
            for _ in 0..(usize::arbitrary(g) % 3 + 1) {
                lines.push(item_line(g));
            }
            blocks.push(format!("{}\n\n{}", heading, lines.join("\n")));
        }

        BodyFixture(blocks.join("\n\n"))
    }
}

#[test]
fn parse_render_parse_is_identity_property() {
    fn property(body: BodyFixture) -> bool {
        let once = parse_sections(&body.0);
        let twice = parse_sections(&render_sections(&once));
        once == twice
    }
    quickcheck::QuickCheck::new()
        .tests(300)
        .quickcheck(property as fn(BodyFixture) -> bool);
}

// --- Determinism ---

#[test]
fn parsing_is_deterministic() {
    let body = "## Tasks\n\n- [ ] a\n- [ ] b\n";
    assert_eq!(parse_sections(body), parse_sections(body));
}

#[test]
fn items_survive_as_parsed_structs() {
    let sections = parse_sections("## Tasks\n\n  12) [x] numbered deep\n");
    assert_eq!(
        sections.tasks[0],
        ChecklistItem {
            indent: "  ".to_string(),
            marker: "12)".to_string(),
            checked: true,
            text: "numbered deep".to_string(),
        }
    );
}
