/// Macro for building a [`MeterId`](crate::MeterId) from a name and
/// `key => value` tag pairs.
///
/// # Examples
///
/// ```
/// use statsd_pollable::{meter_id, MeterId};
///
/// let id = meter_id!("queue.depth", "queue" => "jobs", "priority" => "high");
/// assert_eq!(
///     id,
///     MeterId::new("queue.depth")
///         .with_tag("priority", "high")
///         .with_tag("queue", "jobs")
/// );
///
/// // With no tags
/// let id = meter_id!("threads.running");
/// assert_eq!(id.tag_count(), 0);
///
/// // With owned values
/// let shard = 3;
/// let id = meter_id!("cache.size", "shard" => shard.to_string());
/// assert_eq!(id.tag("shard"), Some("3"));
/// ```
#[macro_export]
macro_rules! meter_id {
    ($name:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::MeterId::new($name)$(.with_tag($key, $value))*
    };
}
