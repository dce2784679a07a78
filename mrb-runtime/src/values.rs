//! Pull-based access to the values of one group.

use common::{Key, MrError, Result, Value};

use crate::context::{Counters, TASK_COUNTER_GROUP};

/// Storage behind a [`ValueIterator`].
///
/// The in-memory [`Group`](crate::Group) is one implementation; anything that
/// can hand out values one at a time in emission order (a spill file, say)
/// can stand in for it.
pub trait ValueSource: Send {
    fn next_value(&mut self) -> Option<Value>;

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl ValueSource for std::vec::IntoIter<Value> {
    fn next_value(&mut self) -> Option<Value> {
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        Iterator::size_hint(self)
    }
}

/// Single-pass, forward-only iterator over the values of one key.
///
/// An iterator is bound to exactly one group and is moved into the reduce
/// hook; it is never shared. Once it reports no more values it stays
/// exhausted.
pub struct ValueIterator {
    key: Key,
    source: Box<dyn ValueSource>,
    peeked: Option<Value>,
    finished: bool,
    consumed: usize,
    counter: Option<(Counters, &'static str)>,
}

impl ValueIterator {
    pub fn new(key: Key, source: impl ValueSource + 'static) -> Self {
        Self {
            key,
            source: Box::new(source),
            peeked: None,
            finished: false,
            consumed: 0,
            counter: None,
        }
    }

    /// Count every value handed out under `name` in the task counter group.
    pub(crate) fn counted(mut self, counters: Counters, name: &'static str) -> Self {
        self.counter = Some((counters, name));
        self
    }

    /// Iterator over an explicit list of values.
    pub fn from_values(key: impl Into<Key>, values: Vec<Value>) -> Self {
        Self::new(key.into(), values.into_iter())
    }

    /// The key whose values this iterator yields.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Number of values handed out so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        if self.finished {
            return false;
        }
        match self.source.next_value() {
            Some(value) => {
                self.peeked = Some(value);
                true
            }
            None => {
                self.finished = true;
                false
            }
        }
    }

    /// Take the next value.
    ///
    /// Fails with [`MrError::IteratorExhausted`] when called after the last
    /// value was taken.
    pub fn next_value(&mut self) -> Result<Value> {
        if !self.has_next() {
            return Err(MrError::IteratorExhausted {
                key: self.key.clone(),
            });
        }
        match self.peeked.take() {
            Some(value) => {
                self.consumed += 1;
                if let Some((counters, name)) = &self.counter {
                    counters.increment(TASK_COUNTER_GROUP, name, 1);
                }
                Ok(value)
            }
            None => Err(MrError::Internal("value iterator lost its peeked value".into())),
        }
    }
}

impl Iterator for ValueIterator {
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (usize::from(self.peeked.is_some()), Some(usize::from(self.peeked.is_some())));
        }
        let (lower, upper) = self.source.size_hint();
        let extra = usize::from(self.peeked.is_some());
        (lower + extra, upper.map(|u| u + extra))
    }
}

impl std::fmt::Debug for ValueIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueIterator")
            .field("key", &self.key)
            .field("consumed", &self.consumed)
            .field("finished", &(self.finished && self.peeked.is_none()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_values_in_order_then_exhausts() {
        let mut values = ValueIterator::from_values("k", vec![1.into(), 2.into(), 3.into()]);
        assert!(values.has_next());
        assert_eq!(values.next_value().unwrap(), Value::Int(1));
        assert_eq!(values.next_value().unwrap(), Value::Int(2));
        assert_eq!(values.next_value().unwrap(), Value::Int(3));
        assert!(!values.has_next());
        assert!(matches!(
            values.next_value(),
            Err(MrError::IteratorExhausted { ref key }) if key.to_string() == "k"
        ));
        assert_eq!(values.consumed(), 3);
    }

    #[test]
    fn has_next_does_not_consume() {
        let mut values = ValueIterator::from_values("k", vec![Value::from("a")]);
        assert!(values.has_next());
        assert!(values.has_next());
        assert_eq!(values.consumed(), 0);
        assert_eq!(values.next_value().unwrap(), Value::from("a"));
    }

    #[test]
    fn stays_exhausted() {
        let mut values = ValueIterator::from_values("k", vec![]);
        assert!(!values.has_next());
        assert!(values.next().is_none());
        assert!(values.next().is_none());
        assert!(values.next_value().is_err());
    }

    /// Hands out values without knowing how many remain.
    struct Unsized(Vec<Value>);

    impl ValueSource for Unsized {
        fn next_value(&mut self) -> Option<Value> {
            self.0.pop()
        }
    }

    #[test]
    fn counts_values_as_they_are_read() {
        let counters = Counters::new();
        let mut values = ValueIterator::new(Key::from("k"), Unsized(vec![1.into(), 2.into(), 3.into()]))
            .counted(counters.clone(), "read");
        assert_eq!(values.size_hint(), (0, None));

        values.next_value().unwrap();
        assert!(values.has_next());
        assert_eq!(counters.get(TASK_COUNTER_GROUP, "read"), 1);
        assert_eq!(values.count(), 2);
        assert_eq!(counters.get(TASK_COUNTER_GROUP, "read"), 3);
    }

    #[test]
    fn works_as_a_std_iterator() {
        let values = ValueIterator::from_values("k", vec![1.into(), 2.into(), 4.into()]);
        assert_eq!(values.size_hint(), (3, Some(3)));
        let total: i64 = values.filter_map(|v| v.as_int()).sum();
        assert_eq!(total, 7);
    }
}
