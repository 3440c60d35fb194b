//! Hints: the closed set of pending-change markers a node can carry on its
//! local or remote side, as produced by [`crate::hint_builder`].

use crate::node::{NodeId, NodeState};

/// A pending change on one side (local or remote) of a node. Deliberately a
/// closed sum rather than a bag of booleans: the merge table in
/// [`crate::hint_builder`] matches on this exhaustively, and the compiler
/// flags any new variant that isn't handled there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Content changed, or a fresh node was created, at this scope.
    /// Carries the new state when a rescan already knows it (e.g. a hash
    /// computed at watch time); `None` means "recheck on execution".
    Modified(Option<NodeState>),
    /// The node was removed at this scope.
    Deleted,
    /// This node is the origin of a move/rename; `dest` is the node that
    /// received the corresponding [`Hint::DestMove`].
    SourceMove(NodeId),
    /// This node is the destination of a move/rename; `source` is the node
    /// that carries the paired [`Hint::SourceMove`].
    DestMove(NodeId),
}

impl Hint {
    pub fn is_move(&self) -> bool {
        matches!(self, Hint::SourceMove(_) | Hint::DestMove(_))
    }

    /// The other half of a move pair, if this hint is one end of one.
    pub fn move_partner(&self) -> Option<NodeId> {
        match self {
            Hint::SourceMove(dest) => Some(*dest),
            Hint::DestMove(source) => Some(*source),
            _ => None,
        }
    }
}
