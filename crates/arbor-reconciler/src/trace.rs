#![forbid(unsafe_code)]

//! Inspectable snapshots of fiber trees and commit records.
//!
//! A [`FiberSnapshot`] copies the tag, key, name, and flags of every fiber
//! reachable through child links. Flags are reported only where a commit
//! pass would see them: below a fiber whose `subtree_flags` is empty, the
//! children are reused committed fibers and report no flags.

use std::fmt::{self, Write as _};

use arbor_core::{Flags, Lane, Lanes};

use crate::fiber::{FiberArena, FiberId, OffscreenMode, WorkTag};
use crate::reconciler::RootId;

/// One fiber and its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberSnapshot {
    pub tag: WorkTag,
    pub key: Option<String>,
    pub name: String,
    pub flags: Flags,
    pub lanes: Lanes,
    /// `true` for an offscreen fiber in hidden mode.
    pub hidden: bool,
    pub children: Vec<FiberSnapshot>,
}

impl FiberSnapshot {
    /// Snapshot the subtree rooted at `id`.
    pub(crate) fn capture(arena: &FiberArena, id: FiberId) -> Self {
        Self::capture_inner(arena, id, true)
    }

    fn capture_inner(arena: &FiberArena, id: FiberId, effective: bool) -> Self {
        let fiber = &arena[id];
        let children_effective = effective && !fiber.subtree_flags.is_empty();
        Self {
            tag: fiber.tag,
            key: fiber.key.as_ref().map(ToString::to_string),
            name: fiber.name().to_string(),
            flags: if effective { fiber.flags } else { Flags::empty() },
            lanes: fiber.lanes,
            hidden: fiber.tag == WorkTag::OffscreenComponent
                && OffscreenMode::of(&fiber.memoized_props) == OffscreenMode::Hidden,
            children: arena
                .children(id)
                .map(|child| Self::capture_inner(arena, child, children_effective))
                .collect(),
        }
    }

    /// Number of fibers in this subtree, including this one.
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }

    /// Depth-first iterator over this subtree.
    pub fn iter(&self) -> impl Iterator<Item = &FiberSnapshot> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Number of fibers in this subtree carrying any of `flags`.
    #[must_use]
    pub fn count_flagged(&self, flags: Flags) -> usize {
        self.iter().filter(|node| node.flags.intersects(flags)).count()
    }

    /// Indented outline, one fiber per line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let _ = write!(out, "{:indent$}{}", "", self.name, indent = depth * 2);
        if let Some(key) = &self.key {
            let _ = write!(out, " key={key}");
        }
        if self.hidden {
            out.push_str(" hidden");
        }
        if !self.flags.is_empty() {
            let _ = write!(out, " {:?}", self.flags);
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

impl fmt::Display for FiberSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// The finished tree of one commit, captured before its mutations ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub root: RootId,
    pub lane: Lane,
    pub tree: FiberSnapshot,
}

impl CommitRecord {
    /// One JSON line summarizing this commit.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        format!(
            r#"{{"event":"commit","root":{},"lane":"{}","fibers":{},"placements":{},"updates":{},"deletions":{}}}"#,
            self.root.index(),
            json_escape(self.lane.label()),
            self.tree.count(),
            self.tree.count_flagged(Flags::PLACEMENT),
            self.tree.count_flagged(Flags::UPDATE),
            self.tree.count_flagged(Flags::CHILD_DELETION),
        )
    }
}

fn json_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Props;
    use crate::fiber::Fiber;

    fn leaf(arena: &mut FiberArena, tag: WorkTag) -> FiberId {
        arena.alloc(Fiber::new(tag, Props::empty(), None))
    }

    #[test]
    fn flags_below_clean_subtree_are_hidden() {
        let mut arena = FiberArena::new();
        let root = leaf(&mut arena, WorkTag::HostRoot);
        let child = leaf(&mut arena, WorkTag::Fragment);
        let stale = leaf(&mut arena, WorkTag::HostText);
        arena[root].child = Some(child);
        arena[child].child = Some(stale);
        arena[stale].flags = Flags::PLACEMENT;

        let snap = FiberSnapshot::capture(&arena, root);
        assert_eq!(snap.count(), 3);
        assert_eq!(snap.count_flagged(Flags::PLACEMENT), 0);

        arena[root].subtree_flags = Flags::PLACEMENT;
        arena[child].subtree_flags = Flags::PLACEMENT;
        let snap = FiberSnapshot::capture(&arena, root);
        assert_eq!(snap.count_flagged(Flags::PLACEMENT), 1);
    }

    #[test]
    fn render_indents_children() {
        let mut arena = FiberArena::new();
        let root = leaf(&mut arena, WorkTag::HostRoot);
        let child = leaf(&mut arena, WorkTag::HostText);
        arena[root].child = Some(child);
        let text = FiberSnapshot::capture(&arena, root).render();
        assert_eq!(text, "root\n  text\n");
    }

    #[test]
    fn jsonl_escapes_and_counts() {
        let mut arena = FiberArena::new();
        let root = leaf(&mut arena, WorkTag::HostRoot);
        let record = CommitRecord {
            root: RootId::from_index(0),
            lane: Lanes::DEFAULT,
            tree: FiberSnapshot::capture(&arena, root),
        };
        let line = record.to_jsonl();
        assert!(line.starts_with(r#"{"event":"commit","root":0"#));
        assert!(line.contains(r#""fibers":1"#));
    }

    #[test]
    fn escape_handles_quotes_and_controls() {
        assert_eq!(json_escape("a\"b"), "a\\\"b");
        assert_eq!(json_escape("\u{1}"), "\\u0001");
    }
}
