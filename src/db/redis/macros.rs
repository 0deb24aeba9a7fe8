/// Read-through lookup against a [`Cache`](crate::db::Cache)
///
/// Evaluates to `Ok(value)` from the cache when present. On a miss the
/// future is awaited, its error propagated with `?`, and the value queued
/// for writing under the key's TTL.
///
/// ```rust,ignore
/// let tag_id: AppResult<Option<String>> = cached!(self.cache, key, async move {
///     self.fetch_tag(category, term).await
/// });
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $fetch:expr) => {{
        match $cache.get(&$key).await {
            Some(hit) => Ok(hit),
            None => {
                let fresh = $fetch.await?;
                $cache.put(&$key, &fresh);
                Ok(fresh)
            }
        }
    }};
}
