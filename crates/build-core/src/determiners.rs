use std::collections::HashMap;

use crate::crds::ImageBuild;
use crate::models::BuildState;

/// Picks the terminal builds that fall outside the retention window.
///
/// Builds are grouped per terminal state and ordered newest first by creation
/// time; everything after the first `retention` entries of a group is
/// returned. A retention of zero disables collection and returns nothing.
/// Non-terminal builds are never returned.
pub fn determine_expired_builds(builds: &[ImageBuild], retention: usize) -> Vec<&ImageBuild> {
    if retention == 0 {
        return Vec::new();
    }

    let mut groups: HashMap<BuildState, Vec<&ImageBuild>> = HashMap::new();
    for build in builds {
        if let Some(state) = build.state().filter(|s| s.is_terminal()) {
            groups.entry(state).or_default().push(build);
        }
    }

    let mut expired = Vec::new();
    for state in [BuildState::Completed, BuildState::Failed] {
        let Some(mut group) = groups.remove(&state) else {
            continue;
        };

        group.sort_by(|a, b| {
            b.metadata
                .creation_timestamp
                .cmp(&a.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });

        expired.extend(group.into_iter().skip(retention));
    }

    expired
}
