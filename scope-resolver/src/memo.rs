/// A value computed at most once and kept until explicitly cleared.
///
/// Empty collections are never memoized: setting an empty value leaves the memo unset,
/// so a later resolution gets another chance to compute something.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Memo<T> {
    value: Option<T>,
}

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Evaluated during this call
    Computed,
    /// Returned from the memo held by the client
    Memo,
    /// Returned from the shared scope store
    Store,
}

/// A resolved value along with its [`Source`]
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: Source) -> Self {
        Self { value, source }
    }

    pub fn was_cached(&self) -> bool {
        self.source != Source::Computed
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Memo<Vec<T>> {
    pub fn get(&self) -> Option<&Vec<T>> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Stores the value unless it is empty
    pub fn set(&mut self, value: Vec<T>) {
        if !value.is_empty() {
            self.value = Some(value);
        }
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

impl<T: Clone> Memo<Vec<T>> {
    /// Returns the memoized value, or computes, memoizes and returns it
    pub fn get_or_compute<F>(&mut self, compute: F) -> Resolved<Vec<T>>
    where
        F: FnOnce() -> Vec<T>,
    {
        if let Some(value) = &self.value {
            return Resolved::new(value.clone(), Source::Memo);
        }
        let value = compute();
        self.set(value.clone());
        Resolved::new(value, Source::Computed)
    }
}

impl<T> From<Vec<T>> for Memo<Vec<T>> {
    fn from(value: Vec<T>) -> Self {
        let mut memo = Self { value: None };
        memo.set(value);
        memo
    }
}
