//! Range iterator over live key-value pairs.

use bytes::Bytes;

use crate::types::Cell;
use crate::Result;

use super::MergeIterator;

/// Ascending `(key, value)` pairs in `[from, to)` with tombstones stripped.
///
/// Wraps a [`MergeIterator`] that already starts at `from`; only the upper
/// bound is enforced here.
pub struct RangeIterator {
    inner: MergeIterator,
    to: Option<Bytes>,
    done: bool,
}

impl RangeIterator {
    pub(crate) fn new(inner: MergeIterator, to: Option<Bytes>) -> Self {
        Self {
            inner,
            to,
            done: false,
        }
    }
}

impl Iterator for RangeIterator {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let record = match self.inner.next()? {
                Ok(record) => record,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if let Some(ref to) = self.to {
                if record.key >= *to {
                    self.done = true;
                    return None;
                }
            }

            if let Cell::Present { data, .. } = record.cell {
                return Some(Ok((record.key, data)));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::vec_source;
    use crate::types::Record;

    fn source() -> MergeIterator {
        MergeIterator::new(vec![vec_source(vec![
            Record::new(Bytes::from("a"), Cell::present(Bytes::from("1"), 1), 0),
            Record::new(Bytes::from("b"), Cell::tombstone(2), 0),
            Record::new(Bytes::from("c"), Cell::present(Bytes::from("3"), 3), 0),
            Record::new(Bytes::from("d"), Cell::present(Bytes::from("4"), 4), 0),
        ])])
    }

    #[test]
    fn test_range_strips_tombstones() {
        let pairs: Vec<_> = RangeIterator::new(source(), None)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Bytes::from("a"), Bytes::from("1")),
                (Bytes::from("c"), Bytes::from("3")),
                (Bytes::from("d"), Bytes::from("4")),
            ]
        );
    }

    #[test]
    fn test_range_upper_bound_exclusive() {
        let keys: Vec<_> = RangeIterator::new(source(), Some(Bytes::from("d")))
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("c")]);

        let empty = RangeIterator::new(source(), Some(Bytes::from("a")));
        assert_eq!(empty.count(), 0);
    }
}
