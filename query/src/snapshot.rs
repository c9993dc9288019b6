/// Point-in-time view of a query's result.
///
/// `T` is the query payload, `E` the error type of the underlying query
/// implementation. Snapshots are cheap views handed across the wrapper
/// boundary; they carry no behavior of their own.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T, E> {
    /// True while a fetch is in flight.
    pub loading: bool,
    /// Most recently fetched payload, if any.
    pub data: Option<T>,
    /// Error reported by the most recent fetch, if it failed. A failed
    /// refetch keeps previously fetched data alongside the error.
    pub error: Option<E>,
    /// True once fetching has started at least once.
    pub called: bool,
}

impl<T, E> QuerySnapshot<T, E> {
    /// The "not yet started" shape: not loading, no data, no error, not
    /// called.
    pub fn quiescent() -> Self {
        Self {
            loading: false,
            data: None,
            error: None,
            called: false,
        }
    }

    /// True when no fetch is in flight.
    pub fn is_settled(&self) -> bool {
        !self.loading
    }

    /// True during the first fetch, before any data or error has arrived.
    pub fn is_initial_loading(&self) -> bool {
        self.loading && self.data.is_none() && self.error.is_none()
    }
}

impl<T, E> Default for QuerySnapshot<T, E> {
    fn default() -> Self {
        Self::quiescent()
    }
}
