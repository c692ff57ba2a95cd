use std::collections::BTreeMap;

use folio_contracts::runs::Preview;
use folio_contracts::{Manifest, UploadResult};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub manifest: Manifest,
    pub stats: MergeStats,
    /// Resolved pages in manifest order.
    pub previews: Vec<Preview>,
}

/// Writes every uploaded URL into a copy of `manifest`. Pages without a
/// stored image keep whatever `imageUrl` they had.
pub fn merge(manifest: &Manifest, uploads: &[UploadResult]) -> MergeOutcome {
    let mut merged = manifest.clone();
    // One URL per page; a later upload of the same page wins.
    let resolved = uploads
        .iter()
        .filter_map(|upload| upload.resolved_url().map(|url| (upload.key, url)))
        .collect::<BTreeMap<_, _>>();

    let mut previews = Vec::with_capacity(resolved.len());
    for (key, url) in resolved {
        let Some(page) = manifest.page(key) else {
            continue;
        };
        if merged.set_image_url(key, url) {
            let title = &manifest.books()[key.book].title;
            previews.push(Preview::new(key, title, page.page_number, url));
        }
    }

    let total = manifest.page_count();
    MergeOutcome {
        manifest: merged,
        stats: MergeStats {
            resolved: previews.len(),
            unresolved: total.saturating_sub(previews.len()),
            total,
        },
        previews,
    }
}
