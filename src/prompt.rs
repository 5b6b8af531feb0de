use crate::checklist::{render_items_or, ChecklistSections};
use crate::types::CheckboxCounts;

/// Build the "PR Tasks and Acceptance Criteria" block appended to the
/// agent's prompt. These are the only bytes the controller contributes to
/// the instruction; everything else comes from the runner's templates.
///
/// Structure: progress line, Scope, Tasks, Acceptance Criteria, optional
/// Source Context, optional reconciliation warning.
pub fn build_task_appendix(
    sections: &ChecklistSections,
    counts: CheckboxCounts,
    needs_task_reconciliation: bool,
) -> String {
    let mut blocks = vec![format!(
        "## PR Tasks and Acceptance Criteria\n\n{}",
        progress_line(counts)
    )];

    if let Some(ref scope) = sections.scope {
        blocks.push(format!("### Scope\n\n{}", scope));
    }

    blocks.push(format!(
        "### Tasks\n\n{}",
        render_items_or(&sections.tasks, "_No tasks listed._")
    ));

    blocks.push(format!(
        "### Acceptance Criteria\n\n{}",
        render_items_or(&sections.acceptance, "_No acceptance criteria listed._")
    ));

    if let Some(context) = source_context(sections) {
        blocks.push(format!("### Source Context\n\n{}", context));
    }

    if needs_task_reconciliation {
        blocks.push(
            "### Task Reconciliation Required\n\n\
            The previous round changed files but no checklist task could be \
            matched to those changes with high confidence. Before doing new \
            work, review the Tasks list above and check off (`[x]`) every \
            task the existing commits already complete."
                .to_string(),
        );
    }

    blocks.join("\n\n")
}

/// `x/y tasks complete, z remaining`.
pub fn progress_line(counts: CheckboxCounts) -> String {
    format!(
        "{}/{} tasks complete, {} remaining",
        counts.checked, counts.total, counts.unchecked
    )
}

/// Source Context is included only when the Source section actually
/// references other PRs or issues (`#123` or an issue/pull URL).
fn source_context(sections: &ChecklistSections) -> Option<String> {
    let source = sections.source.as_deref()?;
    if has_reference(source) {
        Some(source.to_string())
    } else {
        None
    }
}

fn has_reference(text: &str) -> bool {
    if text.contains("/issues/") || text.contains("/pull/") {
        return true;
    }
    // `#123` style reference.
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'#'
            && bytes
                .get(i + 1)
                .is_some_and(|next| next.is_ascii_digit())
    })
}
