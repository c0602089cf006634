//! Merge-join of releases against subscriptions into per-user digests

use std::collections::HashMap;

use crate::model::{Ketchup, Release, User};

/// Group `releases` by the users that should hear about them.
///
/// Both slices must already be sorted ascending by `(repository_id, pattern)`;
/// this is assumed, not checked. Each input is walked once and the
/// subscription cursor never moves back. A subscription receives a release
/// only when its acknowledged version differs from the released tag.
pub fn group(releases: &[Release], ketchups: &[Ketchup]) -> HashMap<User, Vec<Release>> {
    let mut digests: HashMap<User, Vec<Release>> = HashMap::new();
    let mut cursor = 0;

    for release in releases {
        let key = release.key();

        while cursor < ketchups.len() && ketchups[cursor].key() < key {
            cursor += 1;
        }

        let matching = ketchups[cursor..]
            .iter()
            .take_while(|ketchup| ketchup.key() == key);
        for ketchup in matching {
            if ketchup.version != release.version.raw {
                digests
                    .entry(ketchup.user.clone())
                    .or_default()
                    .push(release.clone());
            }
        }
    }

    digests
}
