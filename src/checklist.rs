use crate::types::CheckboxCounts;

/// Sentinel markers delimiting the machine-maintained region of a PR body.
/// When both are present, parsing is restricted to the enclosed region.
pub const AUTO_SUMMARY_START: &str = "<!-- automated-status-summary:start -->";
pub const AUTO_SUMMARY_END: &str = "<!-- automated-status-summary:end -->";

// --- Types ---

/// Recognized section of a PR body checklist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    Scope,
    Tasks,
    Acceptance,
    Source,
}

/// One list item, normalized to checkbox form.
///
/// `indent` and `marker` preserve the author's bullet style so rendering
/// does not rewrite lines beyond adding a missing checkbox glyph.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ChecklistItem {
    pub indent: String,
    /// `-`, `*`, `+`, or a numeric marker like `3.` or `12)`.
    pub marker: String,
    pub checked: bool,
    pub text: String,
}

/// Sections extracted from a PR body.
///
/// Scope and Source are informational text and are never checkbox-normalized
/// or mutated. Tasks and Acceptance are ordered checkbox lists.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ChecklistSections {
    pub scope: Option<String>,
    pub tasks: Vec<ChecklistItem>,
    pub acceptance: Vec<ChecklistItem>,
    pub source: Option<String>,
}

impl ChecklistSections {
    /// Checkbox tally over Tasks and Acceptance combined.
    ///
    /// Items without at least one visible character do not count.
    pub fn counts(&self) -> CheckboxCounts {
        let mut checked = 0u32;
        let mut unchecked = 0u32;
        for item in self.tasks.iter().chain(self.acceptance.iter()) {
            if item.text.trim().is_empty() {
                continue;
            }
            if item.checked {
                checked += 1;
            } else {
                unchecked += 1;
            }
        }
        CheckboxCounts::new(checked, unchecked)
    }
}

// --- Pass 1: line classification ---

#[derive(Debug, PartialEq)]
enum Line {
    SectionHeading(SectionKind),
    OtherHeading,
    Item(ChecklistItem),
    FenceToggle,
    Blank,
    Text(String),
}

/// Map normalized heading text to a section. Case-insensitive callers must
/// lowercase first; trailing colons are stripped by `heading_text`.
fn section_for(name: &str) -> Option<SectionKind> {
    match name {
        "scope" | "why" | "summary" | "background" => Some(SectionKind::Scope),
        "tasks" | "task" | "to do" | "todo" | "implementation notes" => Some(SectionKind::Tasks),
        "acceptance criteria" | "acceptance" | "success criteria" | "definition of done" => {
            Some(SectionKind::Acceptance)
        }
        "source" | "sources" => Some(SectionKind::Source),
        _ => None,
    }
}

/// Strip at most one level of blockquote prefix.
fn strip_blockquote(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("> ") {
        rest
    } else if trimmed == ">" {
        ""
    } else {
        trimmed
    }
}

/// Extract heading text from a line, if the line is shaped like a heading.
///
/// Recognized shapes (after one optional blockquote level):
/// - ATX heading: `## Tasks` (up to six `#`)
/// - Bold heading: `**Tasks**` or `**Tasks:**`
/// - Bold in a list item: `- **Tasks**`
/// - A plain line consisting of nothing but the heading word(s)
///
/// Returns the normalized (lowercased, colon-stripped) text. The plain-line
/// form is only a heading when the text matches the section vocabulary, so
/// callers pass the result to `section_for` before treating it as one.
fn heading_text(line: &str) -> Option<(String, bool)> {
    let s = strip_blockquote(line);
    if s.is_empty() {
        return None;
    }

    // ATX heading
    if s.starts_with('#') {
        let level = s.chars().take_while(|c| *c == '#').count();
        if level <= 6 {
            let rest = &s[level..];
            if let Some(text) = rest.strip_prefix(' ') {
                return Some((normalize_heading(text), true));
            }
        }
        return None;
    }

    // Bold inside a list item: `- **Tasks**`
    let after_bullet = s
        .strip_prefix("- ")
        .or_else(|| s.strip_prefix("* "))
        .or_else(|| s.strip_prefix("+ "))
        .unwrap_or(s);
    let explicit = after_bullet.len() != s.len();

    // Bold heading: `**Tasks**` / `**Tasks:**`
    if let Some(inner) = after_bullet
        .strip_prefix("**")
        .and_then(|r| r.strip_suffix("**").or_else(|| r.strip_suffix("**:")))
    {
        return Some((normalize_heading(inner), true));
    }

    if explicit {
        // A list item that is not a bold heading is never a heading.
        return None;
    }

    // Plain line: only a heading when it matches the vocabulary.
    Some((normalize_heading(s), false))
}

fn normalize_heading(text: &str) -> String {
    text.trim().trim_end_matches(':').trim().to_lowercase()
}

/// Parse a list item line. Returns the item plus whether it already carried
/// a checkbox glyph.
fn parse_item(line: &str) -> Option<(ChecklistItem, bool)> {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, rest) = line.split_at(indent_len);
    if !indent.chars().all(|c| c == ' ' || c == '\t') {
        return None;
    }

    let (marker, after_marker) = parse_marker(rest)?;

    let (checked, had_checkbox, text) = match parse_checkbox(after_marker) {
        Some((checked, text)) => (checked, true, text),
        None => (false, false, after_marker),
    };

    Some((
        ChecklistItem {
            indent: indent.to_string(),
            marker,
            checked,
            text: text.trim_end().to_string(),
        },
        had_checkbox,
    ))
}

/// Split off a bullet or numeric list marker followed by a space.
fn parse_marker(s: &str) -> Option<(String, &str)> {
    if let Some(rest) = s
        .strip_prefix("- ")
        .map(|r| ("-", r))
        .or_else(|| s.strip_prefix("* ").map(|r| ("*", r)))
        .or_else(|| s.strip_prefix("+ ").map(|r| ("+", r)))
    {
        return Some((rest.0.to_string(), rest.1));
    }

    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let after_digits = &s[digits..];
    let sep = after_digits.chars().next()?;
    if sep != '.' && sep != ')' {
        return None;
    }
    let after_sep = &after_digits[1..];
    let body = after_sep.strip_prefix(' ')?;
    Some((format!("{}{}", &s[..digits], sep), body))
}

/// Split off a leading `[ ]` / `[x]` / `[X]` glyph.
fn parse_checkbox(s: &str) -> Option<(bool, &str)> {
    let checked = match s.get(..3)? {
        "[ ]" => false,
        "[x]" | "[X]" => true,
        _ => return None,
    };
    let rest = &s[3..];
    // Glyph must be followed by a space or end the line.
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((checked, rest.trim_start()))
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn classify(line: &str) -> Line {
    if is_fence(line) {
        return Line::FenceToggle;
    }
    if line.trim().is_empty() {
        return Line::Blank;
    }
    if let Some((text, explicit)) = heading_text(line) {
        if let Some(kind) = section_for(&text) {
            return Line::SectionHeading(kind);
        }
        if explicit {
            return Line::OtherHeading;
        }
    }
    if let Some((item, _had)) = parse_item(line) {
        return Line::Item(item);
    }
    Line::Text(line.to_string())
}

// --- Pass 2: folding into sections ---

/// Extract the auto-summary region when both sentinels are present,
/// otherwise return the whole body.
fn parse_region(body: &str) -> &str {
    let start = match body.find(AUTO_SUMMARY_START) {
        Some(idx) => idx + AUTO_SUMMARY_START.len(),
        None => return body,
    };
    match body[start..].find(AUTO_SUMMARY_END) {
        Some(end) => &body[start..start + end],
        None => body,
    }
}

/// Parse a PR body into checklist sections.
///
/// Deterministic and idempotent: `parse(render(parse(b))) == parse(b)`.
/// Content outside recognized sections is discarded from the checklist view;
/// the caller's body is never modified here.
pub fn parse_sections(body: &str) -> ChecklistSections {
    let region = parse_region(body);

    let mut sections = ChecklistSections::default();
    let mut scope_lines: Vec<String> = Vec::new();
    let mut source_lines: Vec<String> = Vec::new();
    let mut current: Option<SectionKind> = None;
    let mut in_fence = false;
    let mut saw_tasks_heading = false;
    let mut saw_acceptance_heading = false;
    // Top-level checkbox items outside any section, for Tasks inference.
    let mut orphans: Vec<ChecklistItem> = Vec::new();

    for raw in region.lines() {
        if in_fence {
            if is_fence(raw) {
                in_fence = false;
            }
            continue;
        }
        match classify(raw) {
            Line::FenceToggle => in_fence = true,
            Line::SectionHeading(kind) => {
                current = Some(kind);
                match kind {
                    SectionKind::Tasks => saw_tasks_heading = true,
                    SectionKind::Acceptance => saw_acceptance_heading = true,
                    _ => {}
                }
            }
            Line::OtherHeading => current = None,
            Line::Item(item) => match current {
                Some(SectionKind::Tasks) => sections.tasks.push(item),
                Some(SectionKind::Acceptance) => sections.acceptance.push(item),
                Some(SectionKind::Scope) => scope_lines.push(raw.to_string()),
                Some(SectionKind::Source) => source_lines.push(raw.to_string()),
                None => {
                    if item.indent.is_empty() && item_has_checkbox(raw) {
                        orphans.push(item);
                    }
                }
            },
            Line::Blank => match current {
                Some(SectionKind::Scope) => push_blank(&mut scope_lines),
                Some(SectionKind::Source) => push_blank(&mut source_lines),
                _ => {}
            },
            Line::Text(text) => match current {
                Some(SectionKind::Scope) => scope_lines.push(text),
                Some(SectionKind::Source) => source_lines.push(text),
                _ => {}
            },
        }
    }

    // Promote a trailing list after an explicit "Acceptance criteria" phrase.
    // Promotion moves items: anything the fold already filed under Tasks is
    // reclaimed so no item is counted twice.
    if !saw_acceptance_heading && sections.acceptance.is_empty() {
        sections.acceptance = trailing_acceptance_list(region);
        for promoted in &sections.acceptance {
            if let Some(pos) = sections.tasks.iter().rposition(|t| t == promoted) {
                sections.tasks.remove(pos);
            }
        }
    }

    // Infer an untitled top-level checkbox list as Tasks. Items already
    // promoted into Acceptance are not claimed twice.
    if !saw_tasks_heading && sections.tasks.is_empty() && !orphans.is_empty() {
        sections.tasks = orphans
            .into_iter()
            .filter(|item| !sections.acceptance.contains(item))
            .collect();
    }

    sections.scope = finish_text(scope_lines);
    sections.source = finish_text(source_lines);
    sections
}

fn item_has_checkbox(line: &str) -> bool {
    matches!(parse_item(line), Some((_, true)))
}

/// Collapse runs of blank lines to a single one.
fn push_blank(lines: &mut Vec<String>) {
    if matches!(lines.last(), Some(last) if last.is_empty()) {
        return;
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
}

fn finish_text(mut lines: Vec<String>) -> Option<String> {
    while matches!(lines.last(), Some(last) if last.is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Find the list immediately following the last non-heading line that
/// mentions "acceptance criteria".
fn trailing_acceptance_list(region: &str) -> Vec<ChecklistItem> {
    let lines: Vec<&str> = region.lines().collect();
    let mut phrase_at: Option<usize> = None;
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if line.to_lowercase().contains("acceptance criteria") && parse_item(line).is_none() {
            phrase_at = Some(idx);
        }
    }

    let Some(start) = phrase_at else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for line in lines.iter().skip(start + 1) {
        if line.trim().is_empty() {
            if items.is_empty() {
                continue;
            }
            break;
        }
        match parse_item(line) {
            Some((item, _)) => items.push(item),
            None => break,
        }
    }
    items
}

// --- Rendering ---

/// Render one item in normalized checkbox form, preserving bullet style
/// and indentation.
pub fn render_item(item: &ChecklistItem) -> String {
    let glyph = if item.checked { "[x]" } else { "[ ]" };
    format!("{}{} {} {}", item.indent, item.marker, glyph, item.text)
}

pub fn render_items(items: &[ChecklistItem]) -> String {
    items
        .iter()
        .map(render_item)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render items, or a placeholder line when the list is empty.
pub fn render_items_or(items: &[ChecklistItem], placeholder: &str) -> String {
    if items.is_empty() {
        placeholder.to_string()
    } else {
        render_items(items)
    }
}

/// Render sections back to markdown. Feeding the output to `parse_sections`
/// yields the same sections.
pub fn render_sections(sections: &ChecklistSections) -> String {
    let mut out = Vec::new();
    if let Some(ref scope) = sections.scope {
        out.push(format!("## Scope\n\n{}", scope));
    }
    out.push(format!(
        "## Tasks\n\n{}",
        render_items_or(&sections.tasks, "_No tasks listed._")
    ));
    out.push(format!(
        "## Acceptance Criteria\n\n{}",
        render_items_or(&sections.acceptance, "_No acceptance criteria listed._")
    ));
    if let Some(ref source) = sections.source {
        out.push(format!("## Source\n\n{}", source));
    }
    out.join("\n\n")
}

// --- Counting and body mutation ---

/// Count checkbox lines in raw text: a bullet or numeric marker, a glyph,
/// and at least one visible character. Fenced code blocks are skipped.
pub fn count_checkboxes(text: &str) -> CheckboxCounts {
    let mut checked = 0u32;
    let mut unchecked = 0u32;
    let mut in_fence = false;
    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((item, had_checkbox)) = parse_item(line) {
            if had_checkbox && !item.text.trim().is_empty() {
                if item.checked {
                    checked += 1;
                } else {
                    unchecked += 1;
                }
            }
        }
    }
    CheckboxCounts::new(checked, unchecked)
}

/// Toggle the first unchecked checkbox line whose text matches `task_text`
/// from `[ ]` to `[x]`, editing only that line. Returns `None` when no
/// matching line exists. Checked boxes are never unchecked.
pub fn toggle_checkbox(body: &str, task_text: &str) -> Option<String> {
    let mut in_fence = false;
    let mut lines: Vec<String> = Vec::new();
    let mut toggled = false;

    for line in body.lines() {
        if !toggled && !in_fence {
            if is_fence(line) {
                in_fence = true;
            } else if let Some((item, had_checkbox)) = parse_item(line) {
                if had_checkbox && !item.checked && item.text == task_text {
                    if let Some(pos) = line.find("[ ]") {
                        let mut edited = String::with_capacity(line.len());
                        edited.push_str(&line[..pos]);
                        edited.push_str("[x]");
                        edited.push_str(&line[pos + 3..]);
                        lines.push(edited);
                        toggled = true;
                        continue;
                    }
                }
            }
        } else if in_fence && is_fence(line) {
            in_fence = false;
        }
        lines.push(line.to_string());
    }

    if !toggled {
        return None;
    }

    let mut out = lines.join("\n");
    if body.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}
