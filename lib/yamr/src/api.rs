use anyhow::Result;
use std::fmt::Display;

// ========== Pluggable MapReduce strategies ==========

/// Per-record transform applied to every non-empty line of a partition.
///
/// One instance is shared by all map jobs, so implementations must not rely
/// on per-call mutable state. Returning an error fails the map job for the
/// partition being processed.
pub trait Mapper {
    /// Intermediate element. Routing to a reduce bucket hashes its byte view,
    /// and elements with an empty byte view are dropped by the shuffle.
    type Element: AsRef<[u8]> + Ord + Send + 'static;

    fn do_map<F>(&self, record: &str, emit: &mut F) -> Result<()>
    where
        F: FnMut(Self::Element);
}

/// Stateful aggregation over the elements of one bucket.
///
/// A fresh reducer is created per bucket and fed the bucket's elements one at
/// a time, in the order the shuffle deposited them.
pub trait Reducer {
    type Element;
    type Out: Display + Send + 'static;

    /// Consumes one element and returns the running result.
    fn do_reduce(&mut self, element: &Self::Element) -> Result<Self::Out>;

    /// Value persisted for the bucket. For an empty bucket this is the strategy's identity.
    fn finish(self) -> Self::Out;
}

/// Creates the reducer for a bucket index.
pub trait ReducerFactory: Send + Sync + 'static {
    type Reducer: Reducer;

    fn create_reducer(&self, bucket: usize) -> Self::Reducer;
}

impl<F, R> ReducerFactory for F
where
    F: Fn(usize) -> R + Send + Sync + 'static,
    R: Reducer,
{
    type Reducer = R;

    fn create_reducer(&self, bucket: usize) -> R {
        (self)(bucket)
    }
}
