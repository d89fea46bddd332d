use super::Judy;

/// Ordered iterator over `(key, cell value)` pairs.
///
/// Drives the trie's own cursor through [`Judy::first`] and [`Judy::next`],
/// so it holds the trie mutably. Keys deeper than the configured cursor
/// depth are yielded truncated.
pub struct Iter<'a> {
    judy: &'a mut Judy,
    started: bool,
}

impl<'a> Iter<'a> {
    pub(super) fn new(judy: &'a mut Judy) -> Self {
        Self {
            judy,
            started: false,
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = (Vec<u8>, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let value = if self.started {
            *self.judy.next()?
        } else {
            self.started = true;
            *self.judy.first()?
        };
        Some((self.judy.key(), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.judy.len()))
    }
}

impl std::iter::FusedIterator for Iter<'_> {}
