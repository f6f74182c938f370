use crate::formats::{HarvestedPage, PageContent, SequencedPage};
use crate::label::PageLabel;

/// Assigns ordinals to a sequenced book and inserts a blank page for every
/// number missing from the Integer run.
///
/// `non_numbered_count` is the number of pages without an Integer label that
/// are expected to precede the body, so Integer page `v` should land on
/// ordinal `v + non_numbered_count`. Only a warning is emitted when it does
/// not; blanks are derived from the labels alone.
///
/// A jump of more than `max_gap` missing numbers is taken as a mislabelled
/// page: it is kept where it is, no blanks are inserted for it, and the run
/// continues from the number before it.
pub fn fill(
    sequence: &[HarvestedPage],
    non_numbered_count: usize,
    max_gap: u32,
) -> Vec<SequencedPage> {
    fill_entries(
        sequence
            .iter()
            .map(|page| (page.label.clone(), PageContent::Resource(page.resource.clone()))),
        non_numbered_count,
        max_gap,
    )
}

/// Re-runs gap filling over an already filled book. Produces no new blanks
/// for a gap-free input.
pub fn refill(
    pages: &[SequencedPage],
    non_numbered_count: usize,
    max_gap: u32,
) -> Vec<SequencedPage> {
    fill_entries(
        pages
            .iter()
            .map(|page| (page.label.clone(), page.content.clone())),
        non_numbered_count,
        max_gap,
    )
}

fn fill_entries(
    entries: impl IntoIterator<Item = (PageLabel, PageContent)>,
    non_numbered_count: usize,
    max_gap: u32,
) -> Vec<SequencedPage> {
    let offset = i64::try_from(non_numbered_count).unwrap_or(i64::MAX);
    let mut out: Vec<SequencedPage> = Vec::new();
    let mut previous: Option<i64> = None;
    let mut misalignment_reported = false;

    for (label, content) in entries {
        if let PageLabel::Integer(value) = label {
            if let Some(prev) = previous {
                let missing_count = value.saturating_sub(prev).saturating_sub(1);
                if missing_count > i64::from(max_gap) {
                    tracing::warn!(
                        page = value,
                        previous = prev,
                        missing = missing_count,
                        max_gap,
                        "page number jumps too far; keeping the page without padding"
                    );
                    push(&mut out, label, content);
                    continue;
                }
                for missing in prev.saturating_add(1)..value {
                    tracing::info!(page = missing, "inserting blank for missing page");
                    push(&mut out, PageLabel::Integer(missing), PageContent::Blank);
                }
            }
            previous = Some(previous.map_or(value, |prev| prev.max(value)));

            let ordinal = i64::try_from(out.len() + 1).unwrap_or(i64::MAX);
            let expected = value.saturating_add(offset);
            if ordinal != expected && !misalignment_reported {
                misalignment_reported = true;
                tracing::warn!(
                    page = value,
                    ordinal,
                    expected,
                    non_numbered = non_numbered_count,
                    "numbered page does not land where expected; unnumbered pages may be interleaved with the body"
                );
            }
        }
        push(&mut out, label, content);
    }

    out
}

fn push(out: &mut Vec<SequencedPage>, label: PageLabel, content: PageContent) {
    let ordinal = out.len() + 1;
    out.push(SequencedPage {
        ordinal,
        label,
        content,
    });
}
