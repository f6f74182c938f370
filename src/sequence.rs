use std::collections::{HashMap, HashSet};

use crate::formats::HarvestedPage;
use crate::label::PageLabel;

/// Orders harvested pages front to back.
///
/// Roman-labelled front matter comes first, ascending; Integer-labelled body
/// pages follow, ascending. Opaque pages keep their discovery order and stay
/// right after the numbered page discovered just before them, or lead the
/// book when nothing numbered was seen yet (a "Cover" page).
///
/// Pages are considered in `discovered_at` order, so the result depends only
/// on the set of pages and sequencing is idempotent. Repeated labels keep the
/// first discovered page.
pub fn sequence(pages: impl IntoIterator<Item = HarvestedPage>) -> Vec<HarvestedPage> {
    let mut by_discovery = pages.into_iter().collect::<Vec<_>>();
    by_discovery.sort_by_key(|page| page.discovered_at);

    let mut seen: HashSet<PageLabel> = HashSet::new();
    let mut leading: Vec<HarvestedPage> = Vec::new();
    let mut anchored: HashMap<PageLabel, Vec<HarvestedPage>> = HashMap::new();
    let mut romans: Vec<HarvestedPage> = Vec::new();
    let mut integers: Vec<HarvestedPage> = Vec::new();
    let mut last_numbered: Option<PageLabel> = None;

    for page in by_discovery {
        if !seen.insert(page.label.clone()) {
            tracing::warn!(
                label = %page.label,
                position = page.position,
                "duplicate page label; keeping the first discovered page"
            );
            continue;
        }

        match &page.label {
            PageLabel::Opaque(_) => match &last_numbered {
                Some(anchor) => anchored.entry(anchor.clone()).or_default().push(page),
                None => leading.push(page),
            },
            PageLabel::Roman(_) => {
                last_numbered = Some(page.label.clone());
                romans.push(page);
            }
            PageLabel::Integer(_) => {
                last_numbered = Some(page.label.clone());
                integers.push(page);
            }
        }
    }

    romans.sort_by_key(|page| match page.label {
        PageLabel::Roman(n) => n,
        _ => 0,
    });
    integers.sort_by_key(|page| page.label.integer().unwrap_or_default());

    let mut out = leading;
    for page in romans.into_iter().chain(integers) {
        let followers = anchored.remove(&page.label);
        out.push(page);
        out.extend(followers.into_iter().flatten());
    }
    out
}

/// Number of pages in `pages` that do not carry an Integer label.
pub fn count_non_numbered(pages: &[HarvestedPage]) -> usize {
    pages.iter().filter(|page| !page.label.is_integer()).count()
}
