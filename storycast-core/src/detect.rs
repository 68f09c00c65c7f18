//! Change detection between two editor snapshots.
//!
//! The broadcasters treat the two kinds of change very differently:
//! a structural change (slide content or order) is debounced, a
//! navigational change (only `active_index`) is sent immediately.

use crate::story::{EditorState, Slide};

/// Result of comparing two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Change {
    /// A broadcast is needed.
    pub changed: bool,
    /// The slide sequence itself differs.
    pub structural: bool,
}

impl Change {
    pub const NONE: Change = Change { changed: false, structural: false };
    pub const STRUCTURAL: Change = Change { changed: true, structural: true };
    pub const NAVIGATION: Change = Change { changed: true, structural: false };

    /// Only the active slide moved.
    pub fn is_navigation_only(&self) -> bool {
        self.changed && !self.structural
    }
}

/// Sequence equality: same length, same ids in the same order, same
/// normalized content per slide.
pub fn slides_equal(a: &[Slide], b: &[Slide]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.id == y.id && x.same_content(y))
}

/// Compare `current` against the last snapshot a renderer was sent.
///
/// With no previous snapshot every state is a structural change: the
/// renderer has nothing to navigate within yet.
pub fn has_changed(previous: Option<&EditorState>, current: &EditorState) -> Change {
    let Some(previous) = previous else {
        return Change::STRUCTURAL;
    };

    if !slides_equal(&previous.slides, &current.slides) {
        return Change::STRUCTURAL;
    }
    if previous.active_index != current.active_index {
        return Change::NAVIGATION;
    }
    Change::NONE
}
