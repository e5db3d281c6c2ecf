//! Single-elimination bracket as an immutable binary tree

use super::PlayerId;

/// Bracket tree. Leaves are participants still alive in that slot; a node
/// whose children are both leaves is a pairing ready to be played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bracket {
    Leaf(PlayerId),
    Node(Box<Bracket>, Box<Bracket>),
}

impl Bracket {
    /// Split the seeded list at its midpoint until every subtree is a single
    /// participant. Returns `None` for an empty list.
    pub fn build(players: &[PlayerId]) -> Option<Self> {
        match players {
            [] => None,
            [only] => Some(Bracket::Leaf(*only)),
            _ => {
                let mid = players.len() / 2;
                let left = Self::build(&players[..mid])?;
                let right = Self::build(&players[mid..])?;
                Some(Bracket::Node(Box::new(left), Box::new(right)))
            }
        }
    }

    /// New bracket with `loser` knocked out. A leaf-vs-leaf node holding
    /// exactly the two collapses to the winner; any other `loser` leaf is
    /// replaced by the winner.
    pub fn advance(&self, winner: PlayerId, loser: PlayerId) -> Bracket {
        match self {
            Bracket::Leaf(id) if *id == loser => Bracket::Leaf(winner),
            Bracket::Leaf(id) => Bracket::Leaf(*id),
            Bracket::Node(left, right) => match (left.as_ref(), right.as_ref()) {
                (Bracket::Leaf(a), Bracket::Leaf(b))
                    if (*a == winner && *b == loser) || (*a == loser && *b == winner) =>
                {
                    Bracket::Leaf(winner)
                }
                _ => Bracket::Node(
                    Box::new(left.advance(winner, loser)),
                    Box::new(right.advance(winner, loser)),
                ),
            },
        }
    }

    /// Every leaf-vs-leaf pairing, depth-first, left before right
    pub fn ready_pairings(&self) -> Vec<(PlayerId, PlayerId)> {
        let mut out = Vec::new();
        self.collect_ready(&mut out);
        out
    }

    fn collect_ready(&self, out: &mut Vec<(PlayerId, PlayerId)>) {
        if let Bracket::Node(left, right) = self {
            if let (Bracket::Leaf(a), Bracket::Leaf(b)) = (left.as_ref(), right.as_ref()) {
                out.push((*a, *b));
            } else {
                left.collect_ready(out);
                right.collect_ready(out);
            }
        }
    }

    /// First ready pairing whose participants are not already playing
    pub fn find_next_ready_match<F>(&self, in_play: F) -> Option<(PlayerId, PlayerId)>
    where
        F: Fn(PlayerId) -> bool,
    {
        self.ready_pairings()
            .into_iter()
            .find(|(a, b)| !in_play(*a) && !in_play(*b))
    }

    /// The remaining participant once the tree has fully collapsed
    pub fn champion(&self) -> Option<PlayerId> {
        match self {
            Bracket::Leaf(id) => Some(*id),
            Bracket::Node(..) => None,
        }
    }

    /// Leaves in left-to-right order
    pub fn leaves(&self) -> Vec<PlayerId> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<PlayerId>) {
        match self {
            Bracket::Leaf(id) => out.push(*id),
            Bracket::Node(left, right) => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }

    /// Count of distinct identities still in the tree
    #[cfg(test)]
    pub(crate) fn distinct(&self) -> usize {
        self.leaves()
            .into_iter()
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: PlayerId) -> bool {
        match self {
            Bracket::Leaf(leaf) => *leaf == id,
            Bracket::Node(left, right) => left.contains(id) || right.contains(id),
        }
    }
}
